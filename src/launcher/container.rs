//! Container launches through the host's container runtime.
//!
//! The container runs in the foreground (`run --rm`) so its lifetime is the
//! lifetime of the runtime client process. The paired release removes the
//! container by name in case the client dies without cleaning up.
//! `working_directory` applies inside the container, not to the client.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::executable::resolve_program;
use super::process::{LaunchPlan, ScopedRelease};
use super::LaunchContext;
use crate::models::host::HostId;
use crate::models::session::SessionDescriptor;
use crate::{AppError, Result};

/// Upper bound on the `rm -f` cleanup call.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Deterministic container name for one launch generation.
#[must_use]
pub fn container_name(host: &HostId, session_id: &str, generation: u64) -> String {
    let session: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{session}-{generation}", host.slug())
}

/// `run` argument list for an image.
///
/// Environment variables are passed by name only; the runtime client reads
/// their values from its own environment, so they never appear in argv.
#[must_use]
pub fn run_arguments<'a>(
    name: &str,
    image: &str,
    env_names: impl IntoIterator<Item = &'a str>,
    working_directory: Option<&Path>,
    args: &[String],
) -> Vec<String> {
    let mut argv = vec![
        "run".to_owned(),
        "--rm".to_owned(),
        "--name".to_owned(),
        name.to_owned(),
    ];
    for key in env_names {
        argv.push("-e".into());
        argv.push(key.to_owned());
    }
    if let Some(dir) = working_directory {
        argv.push("-w".into());
        argv.push(dir.to_string_lossy().into_owned());
    }
    argv.push(image.to_owned());
    argv.extend(args.iter().cloned());
    argv
}

/// Locate the container runtime binary.
///
/// # Errors
///
/// Returns `AppError::Launch` if it is not installed.
pub fn resolve_runtime(runtime: &str) -> Result<PathBuf> {
    resolve_program(runtime)
        .map_err(|_| AppError::Launch(format!("container runtime '{runtime}' not found")))
}

pub(super) fn plan(
    ctx: &LaunchContext,
    descriptor: &SessionDescriptor,
    generation: u64,
) -> Result<LaunchPlan> {
    let runtime_name = ctx
        .endpoint
        .container_runtime
        .as_deref()
        .unwrap_or(&ctx.config.launcher.container_runtime);
    let runtime = resolve_runtime(runtime_name)?;

    let name = container_name(&ctx.host, &descriptor.id, generation);
    let environment = ctx.environment_for(descriptor);

    let mut plan = LaunchPlan::new(runtime.clone());
    plan.args = run_arguments(
        &name,
        &descriptor.command,
        environment.keys().map(String::as_str),
        descriptor.working_directory.as_deref(),
        &descriptor.args,
    );
    plan.environment = environment;
    plan.release = Some(remove_container(runtime, name));
    Ok(plan)
}

fn remove_container(runtime: PathBuf, name: String) -> ScopedRelease {
    let label = format!("remove container {name}");
    ScopedRelease::new(label, move || async move {
        let mut cmd = Command::new(&runtime);
        cmd.args(["rm", "-f", name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match tokio::time::timeout(REMOVE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => debug!(container = %name, %status, "container removed"),
            Ok(Err(err)) => warn!(container = %name, %err, "container removal failed"),
            Err(_) => warn!(container = %name, "container removal timed out"),
        }
    })
}
