//! Debug launches through an out-of-process debugger worker.
//!
//! The worker is started first and told which port to listen on. Once it
//! accepts connections the orchestrator sends one `launch` request line and
//! waits for `{"status":"attached"}`. The worker then owns the debuggee; its
//! own lifetime stands in for the session process.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::{LaunchPlan, ProcessHandle};
use crate::config::DebuggerConfig;
use crate::{AppError, Result};

/// Port the worker must listen on.
pub const DEBUGGER_WORKER_PORT: &str = "DEBUGGER_WORKER_PORT";
/// Debugger session identifier handed to the worker.
pub const DEBUGGER_SESSION_ID: &str = "DEBUGGER_SESSION_ID";

/// Request sent to the worker once it is reachable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    /// Always `launch`.
    pub command: String,
    /// Fresh id allocated for this debug session.
    pub debugger_session_id: u64,
    /// Orchestrated session id.
    pub session_id: String,
    /// Program the worker starts under the debugger.
    pub program: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory for the debuggee.
    pub working_directory: Option<String>,
    /// Debuggee environment overlay.
    pub environment: BTreeMap<String, String>,
}

impl AttachRequest {
    /// Build the request that launches `plan` under the debugger.
    #[must_use]
    pub fn for_plan(plan: &LaunchPlan, session_id: &str, debugger_session_id: u64) -> Self {
        Self {
            command: "launch".into(),
            debugger_session_id,
            session_id: session_id.to_owned(),
            program: plan.program.to_string_lossy().into_owned(),
            args: plan.args.clone(),
            working_directory: plan
                .working_directory
                .as_ref()
                .map(|dir| dir.to_string_lossy().into_owned()),
            environment: plan.environment.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AttachReply {
    Attached,
    Failed {
        #[serde(default)]
        message: String,
    },
}

/// Live connection to a debugger worker; closing it detaches.
#[derive(Debug)]
pub struct DebuggerAttachment {
    debugger_session_id: u64,
    port: u16,
    _connection: TcpStream,
}

impl DebuggerAttachment {
    /// Debugger session id.
    #[must_use]
    pub fn debugger_session_id(&self) -> u64 {
        self.debugger_session_id
    }

    /// Worker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Reserve a free loopback port for the worker.
///
/// # Errors
///
/// Returns `AppError::Debugger` if no port can be bound.
pub async fn allocate_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .map_err(|err| AppError::Debugger(format!("cannot allocate worker port: {err}")))?;
    let port = listener
        .local_addr()
        .map_err(|err| AppError::Debugger(format!("cannot allocate worker port: {err}")))?
        .port();
    Ok(port)
}

/// Probe `addr` until it accepts a connection.
///
/// # Errors
///
/// - `AppError::Debugger` after `attempts` failed probes.
/// - `AppError::Cancelled` if `cancel` fires first.
pub async fn wait_until_ready(
    addr: SocketAddr,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<TcpStream> {
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("debug launch abandoned".into()));
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(%addr, attempt, "debugger worker ready");
                return Ok(stream);
            }
            Err(err) => debug!(%addr, attempt, %err, "debugger worker not ready"),
        }
        if attempt < attempts {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::Cancelled("debug launch abandoned".into()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
    Err(AppError::Debugger(format!(
        "worker on port {} did not become ready after {attempts} attempts",
        addr.port()
    )))
}

/// Send `request` and wait for the worker to confirm the attach.
///
/// Lines that are not an attach reply are ignored.
///
/// # Errors
///
/// Returns `AppError::Debugger` if the worker refuses, disconnects, or does
/// not answer within `timeout`.
pub async fn attach<S>(stream: &mut S, request: &AttachRequest, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(request)
        .map_err(|err| AppError::Debugger(format!("cannot encode attach request: {err}")))?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|err| AppError::Debugger(format!("cannot send attach request: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| AppError::Debugger(format!("cannot send attach request: {err}")))?;

    let confirm = async {
        let mut reader = BufReader::new(&mut *stream);
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = reader
                .read_line(&mut buf)
                .await
                .map_err(|err| AppError::Debugger(format!("attach read failed: {err}")))?;
            if n == 0 {
                return Err(AppError::Debugger(
                    "worker closed the connection before confirming attach".into(),
                ));
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AttachReply>(trimmed) {
                Ok(AttachReply::Attached) => return Ok(()),
                Ok(AttachReply::Failed { message }) => {
                    return Err(AppError::Debugger(format!("attach refused: {message}")));
                }
                Err(err) => debug!(%err, line = trimmed, "ignoring non-reply worker line"),
            }
        }
    };

    tokio::time::timeout(timeout, confirm)
        .await
        .map_err(|_| AppError::Debugger(format!("attach not confirmed within {timeout:?}")))?
}

/// Start the worker, wait for it, and attach `plan` to it.
///
/// The returned handle owns the worker process. On any failure the worker
/// is killed before the error is returned.
///
/// # Errors
///
/// - `AppError::Debugger` if no worker is configured, it never becomes
///   ready, or it refuses the attach.
/// - `AppError::Launch` if the worker cannot be spawned.
/// - `AppError::Cancelled` if the host goes away mid-launch.
pub async fn launch_under_debugger(
    config: &DebuggerConfig,
    plan: LaunchPlan,
    session_id: &str,
    generation: u64,
    debugger_session_id: u64,
    cancel: &CancellationToken,
) -> Result<ProcessHandle> {
    let worker = config
        .worker_command
        .as_deref()
        .filter(|cmd| !cmd.trim().is_empty())
        .ok_or_else(|| AppError::Debugger("no debugger worker configured".into()))?;

    let port = allocate_port().await?;
    let request = AttachRequest::for_plan(&plan, session_id, debugger_session_id);

    let mut worker_plan = LaunchPlan::new(worker);
    worker_plan.args.clone_from(&config.worker_args);
    worker_plan.environment = plan.environment;
    worker_plan
        .environment
        .insert(DEBUGGER_WORKER_PORT.into(), port.to_string());
    worker_plan
        .environment
        .insert(DEBUGGER_SESSION_ID.into(), debugger_session_id.to_string());
    worker_plan.working_directory = plan.working_directory;
    worker_plan.release = plan.release;

    let mut handle = worker_plan.spawn(session_id, generation)?;

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = match wait_until_ready(
        addr,
        config.ready_attempts,
        config.ready_delay(),
        cancel,
    )
    .await
    {
        Ok(stream) => stream,
        Err(err) => {
            handle.abort().await;
            return Err(err);
        }
    };

    if let Err(err) = attach(&mut stream, &request, config.attach_timeout()).await {
        handle.abort().await;
        return Err(err);
    }

    info!(session_id, debugger_session_id, port, "debugger attached");
    handle.attach_debugger(DebuggerAttachment {
        debugger_session_id,
        port,
        _connection: stream,
    });
    Ok(handle)
}
