//! Launched processes: spawn plans, scoped releases, and exit supervision.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::debugger::DebuggerAttachment;
use super::output::{spawn_output_pump, OutputStream};
use crate::events::EventSink;
use crate::models::event::ExitReason;
use crate::models::session::SessionState;
use crate::{AppError, Result};

/// How long output pumps may keep draining after the process exits.
const PUMP_DRAIN: Duration = Duration::from_secs(2);

type ReleaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ReleaseAction = Box<dyn FnOnce() -> ReleaseFuture + Send>;

// ── Scoped release ───────────────────────────────────────────────────────────

/// Cleanup paired with a launch (for example removing a container).
///
/// Runs exactly once: either awaited through [`ScopedRelease::run`] or, if
/// the owner is dropped first, spawned onto the current runtime.
pub struct ScopedRelease {
    label: String,
    action: Option<ReleaseAction>,
}

impl ScopedRelease {
    /// Wrap an async cleanup action.
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            action: Some(Box::new(move || Box::pin(action()) as ReleaseFuture)),
        }
    }

    /// Run the cleanup now.
    pub async fn run(mut self) {
        if let Some(action) = self.action.take() {
            debug!(release = %self.label, "running release");
            action().await;
        }
    }

    /// Discard without running; used when the resource was never acquired.
    pub fn disarm(mut self) {
        self.action = None;
    }
}

impl Debug for ScopedRelease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedRelease")
            .field("label", &self.label)
            .field("pending", &self.action.is_some())
            .finish()
    }
}

impl Drop for ScopedRelease {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(action());
                }
                Err(_) => warn!(release = %self.label, "release dropped outside a runtime, skipped"),
            }
        }
    }
}

// ── Launch plan ──────────────────────────────────────────────────────────────

/// Fully resolved command line for one launch.
#[derive(Debug)]
pub struct LaunchPlan {
    /// Resolved program path.
    pub program: PathBuf,
    /// Ordered arguments.
    pub args: Vec<String>,
    /// Complete environment overlay for the child.
    pub environment: BTreeMap<String, String>,
    /// Working directory, when declared.
    pub working_directory: Option<PathBuf>,
    /// Cleanup to run when the process is gone.
    pub release: Option<ScopedRelease>,
}

impl LaunchPlan {
    /// Plan that runs `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: None,
            release: None,
        }
    }

    /// Spawn the planned process with piped output and `kill_on_drop`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the OS refuses to start the process. The
    /// release is discarded in that case.
    pub fn spawn(self, session_id: &str, generation: u64) -> Result<ProcessHandle> {
        let Self {
            program,
            args,
            environment,
            working_directory,
            release,
        } = self;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &working_directory {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                if let Some(release) = release {
                    release.disarm();
                }
                return Err(AppError::Launch(format!(
                    "failed to spawn {}: {err}",
                    program.display()
                )));
            }
        };

        let pid = child.id();
        info!(session_id, generation, ?pid, program = %program.display(), "session process spawned");
        Ok(ProcessHandle {
            session_id: session_id.to_owned(),
            generation,
            child,
            pid,
            release,
            debugger: None,
        })
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, absent when ended by a signal.
    pub exit_code: Option<i32>,
    /// Classification of the exit.
    pub reason: ExitReason,
}

impl ProcessExit {
    /// Classify a raw exit status.
    #[must_use]
    pub fn classify(status: Option<ExitStatus>, stop_requested: bool) -> Self {
        let exit_code = status.and_then(|s| s.code());
        let reason = if stop_requested {
            ExitReason::KilledByOrchestrator
        } else if exit_code.is_some() {
            ExitReason::Normal
        } else {
            ExitReason::KilledExternally
        };
        Self { exit_code, reason }
    }

    /// State the session lands in after this exit.
    #[must_use]
    pub fn terminal_state(self) -> SessionState {
        match (self.reason, self.exit_code) {
            (ExitReason::KilledByOrchestrator, _) | (ExitReason::Normal, Some(0)) => {
                SessionState::Stopped
            }
            _ => SessionState::Crashed,
        }
    }
}

/// Exclusive owner of one live OS process and its paired resources.
///
/// Dropping the handle kills the process and fires the release.
#[derive(Debug)]
pub struct ProcessHandle {
    session_id: String,
    generation: u64,
    child: Child,
    pid: Option<u32>,
    release: Option<ScopedRelease>,
    debugger: Option<DebuggerAttachment>,
}

impl ProcessHandle {
    /// OS process id, if the process had one at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Launch generation this process belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a debugger is attached.
    #[must_use]
    pub fn is_debugging(&self) -> bool {
        self.debugger.is_some()
    }

    pub(crate) fn attach_debugger(&mut self, attachment: DebuggerAttachment) {
        self.debugger = Some(attachment);
    }

    fn detach_debugger(&mut self) {
        if let Some(attachment) = self.debugger.take() {
            debug!(
                session_id = %self.session_id,
                debugger_session_id = attachment.debugger_session_id(),
                port = attachment.port(),
                "detaching debugger"
            );
        }
    }

    /// Kill immediately and run the release. Used when a launch completes
    /// after its host has gone away.
    pub async fn abort(mut self) {
        if let Err(err) = self.child.kill().await {
            debug!(session_id = %self.session_id, %err, "abort: kill failed");
        }
        self.detach_debugger();
        if let Some(release) = self.release.take() {
            release.run().await;
        }
    }

    /// Pump output and wait for the process to end.
    ///
    /// A message on `stop` or cancellation of `cancel` sends a termination
    /// signal, waits `grace`, then kills. Output is drained and the release
    /// runs before this returns.
    pub async fn supervise(
        mut self,
        sink: EventSink,
        mut stop: oneshot::Receiver<()>,
        cancel: CancellationToken,
        grace: Duration,
    ) -> ProcessExit {
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = self.child.stdout.take() {
            pumps.push(spawn_output_pump(
                stdout,
                OutputStream::Stdout,
                self.session_id.clone(),
                sink.clone(),
            ));
        }
        if let Some(stderr) = self.child.stderr.take() {
            pumps.push(spawn_output_pump(
                stderr,
                OutputStream::Stderr,
                self.session_id.clone(),
                sink,
            ));
        }

        let (status, stop_requested) = tokio::select! {
            status = self.child.wait() => (status, false),
            Ok(()) = &mut stop => (terminate(&mut self.child, grace).await, true),
            () = cancel.cancelled() => (terminate(&mut self.child, grace).await, true),
        };

        for mut pump in pumps {
            if tokio::time::timeout(PUMP_DRAIN, &mut pump).await.is_err() {
                pump.abort();
            }
        }

        self.detach_debugger();
        if let Some(release) = self.release.take() {
            release.run().await;
        }

        let status = match status {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(session_id = %self.session_id, %err, "failed to collect exit status");
                None
            }
        };
        let exit = ProcessExit::classify(status, stop_requested);
        info!(
            session_id = %self.session_id,
            generation = self.generation,
            exit_code = ?exit.exit_code,
            reason = %exit.reason,
            "session process exited"
        );
        exit
    }
}

/// Graceful stop: termination request, grace period, then hard kill.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    request_termination(child);
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }
    warn!(pid = ?child.id(), "process ignored termination request, killing");
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "termination request failed");
    }
}
