//! Optional host program supervision.
//!
//! When the orchestrator is asked to start the host itself, the host program
//! gets the control endpoint through its environment and its exit ends the
//! host lifetime exactly like a control channel disconnect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::launcher::process::terminate;
use crate::models::host::{HostId, DEVHOST_CONTROL_PORT};
use crate::{AppError, Result};

/// Command line of a host program started by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProgram {
    /// Program to run.
    pub command: String,
    /// Ordered arguments.
    pub args: Vec<String>,
    /// Working directory; defaults to the orchestrator's.
    pub working_directory: Option<PathBuf>,
}

/// Spawn the host program with the host environment plus the control port.
///
/// Output is inherited so the host's own logs stay visible.
///
/// # Errors
///
/// Returns `AppError::Launch` if the program cannot be started.
pub fn spawn_host_program(
    program: &HostProgram,
    host: &HostId,
    environment: &HashMap<String, String>,
    control_port: u16,
) -> Result<Child> {
    let span = info_span!("spawn_host_program", host = %host, command = %program.command);
    let _guard = span.enter();

    let mut cmd = Command::new(&program.command);
    cmd.args(&program.args)
        .envs(environment)
        .env(DEVHOST_CONTROL_PORT, control_port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &program.working_directory {
        cmd.current_dir(dir);
    }

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("failed to start host program: {err}")))?;

    info!(pid = ?child.id(), control_port, "host program started");
    Ok(child)
}

/// Wait for the host program to exit and call `on_exit`, or stop it when
/// the host lifetime is cancelled first.
#[must_use]
pub fn monitor_host_program<F>(
    host: HostId,
    mut child: Child,
    cancel: CancellationToken,
    grace: Duration,
    on_exit: F,
) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => info!(host = %host, %status, "host program exited"),
                    Err(err) => warn!(host = %host, %err, "failed to wait for host program"),
                }
                on_exit();
            }
            () = cancel.cancelled() => {
                match terminate(&mut child, grace).await {
                    Ok(status) => info!(host = %host, %status, "host program stopped"),
                    Err(err) => warn!(host = %host, %err, "failed to stop host program"),
                }
            }
        }
    })
}
