//! Session launcher.
//!
//! Turns a [`SessionDescriptor`] into a live [`ProcessHandle`]. The launch
//! strategy is picked from the session kind by [`strategy_for`]; each
//! strategy resolves a [`LaunchPlan`] and the plan is spawned either
//! directly or through the debugger worker.

pub mod container;
pub mod debugger;
pub mod environment;
pub mod executable;
pub mod output;
pub mod process;
pub mod project;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use crate::config::GlobalConfig;
use crate::models::host::{HostEndpoint, HostId};
use crate::models::session::{SessionDescriptor, SessionKind};
use crate::{AppError, Result};

pub use process::{LaunchPlan, ProcessExit, ProcessHandle, ScopedRelease};

/// Launch strategy, one per session kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Managed runtime project; the only strategy that can debug.
    Project,
    /// Plain executable.
    Executable,
    /// Container image.
    Container,
}

impl LaunchStrategy {
    /// Whether launches with this strategy can run under the debugger.
    #[must_use]
    pub fn supports_debugging(self) -> bool {
        matches!(self, Self::Project)
    }
}

/// Select the strategy for a session kind.
#[must_use]
pub fn strategy_for(kind: SessionKind) -> LaunchStrategy {
    match kind {
        SessionKind::Project => LaunchStrategy::Project,
        SessionKind::Executable => LaunchStrategy::Executable,
        SessionKind::Container => LaunchStrategy::Container,
    }
}

/// Per-host inputs shared by every launch.
#[derive(Debug)]
pub struct LaunchContext {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Owning host.
    pub host: HostId,
    /// Host endpoint (token, collaborator URLs, runtime override).
    pub endpoint: HostEndpoint,
    debugger_ids: Arc<AtomicU64>,
}

impl LaunchContext {
    /// Bundle the launch inputs for a host. `debugger_ids` is shared across
    /// hosts so debugger session ids never repeat within the process.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        host: HostId,
        endpoint: HostEndpoint,
        debugger_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            config,
            host,
            endpoint,
            debugger_ids,
        }
    }

    /// Environment for a session: injected endpoints overlaid by the
    /// descriptor's own values.
    #[must_use]
    pub fn environment_for(&self, descriptor: &SessionDescriptor) -> BTreeMap<String, String> {
        environment::session_environment(&self.endpoint, &descriptor.id, &descriptor.environment)
    }

    fn next_debugger_session_id(&self) -> u64 {
        self.debugger_ids.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Cheap-to-clone launcher bound to one host.
#[derive(Debug, Clone)]
pub struct Launcher {
    ctx: Arc<LaunchContext>,
}

impl Launcher {
    /// Create a launcher for a host.
    #[must_use]
    pub fn new(ctx: LaunchContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Resolve the plan for a descriptor without spawning anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if a runtime or program cannot be resolved.
    pub fn plan(&self, descriptor: &SessionDescriptor, generation: u64) -> Result<LaunchPlan> {
        match strategy_for(descriptor.kind) {
            LaunchStrategy::Project => project::plan(&self.ctx, descriptor),
            LaunchStrategy::Executable => executable::plan(&self.ctx, descriptor),
            LaunchStrategy::Container => container::plan(&self.ctx, descriptor, generation),
        }
    }

    /// Launch one generation of a session.
    ///
    /// # Errors
    ///
    /// - `AppError::Launch` when the plan cannot be resolved or spawned.
    /// - `AppError::Debugger` when a debug launch fails.
    /// - `AppError::Cancelled` when `cancel` has fired.
    pub async fn launch(
        &self,
        descriptor: &SessionDescriptor,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<ProcessHandle> {
        let strategy = strategy_for(descriptor.kind);
        let span = info_span!(
            "launch",
            host = %self.ctx.host,
            session_id = %descriptor.id,
            kind = descriptor.kind.as_str(),
            generation,
            debug = descriptor.debug,
        );

        async {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled("host is shutting down".into()));
            }
            if descriptor.debug && !strategy.supports_debugging() {
                return Err(AppError::Launch(format!(
                    "{} sessions cannot be debugged",
                    descriptor.kind.as_str()
                )));
            }

            let plan = self.plan(descriptor, generation)?;
            if descriptor.debug {
                let debugger_session_id = self.ctx.next_debugger_session_id();
                debugger::launch_under_debugger(
                    &self.ctx.config.debugger,
                    plan,
                    &descriptor.id,
                    generation,
                    debugger_session_id,
                    cancel,
                )
                .await
            } else {
                plan.spawn(&descriptor.id, generation)
            }
        }
        .instrument(span)
        .await
    }
}
