//! Orchestrator context.
//!
//! [`Orchestrator`] is constructed when a workspace opens and closed when it
//! closes. It owns the session registry, the event bus, and one runtime per
//! application host: the host's control channel, HTTP surface, supervisor,
//! and optional host program. Tearing a host down cancels its lifetime
//! token, stops every live process it owns, and then drops its sessions.

pub mod controller;
pub mod host_process;
pub mod registry;
pub mod supervisor;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use url::Url;

use crate::channel::server::{self as control_server, spawn_control_channel};
use crate::channel::HostCommands;
use crate::config::GlobalConfig;
use crate::events::{EventBus, EventSink, EventSubscription};
use crate::http::{self, spawn_http_surface};
use crate::launcher::{LaunchContext, Launcher};
use crate::models::host::{Host, HostEndpoint, HostId};
use crate::models::session::{Session, SessionDescriptor, SessionState};
use crate::{AppError, Result};

use controller::HostController;
use host_process::{monitor_host_program, spawn_host_program, HostProgram};
use registry::{AddOutcome, SessionRegistry};
use supervisor::SessionSupervisor;

/// Everything needed to bring up one application host.
#[derive(Debug, Clone, Default)]
pub struct HostSpec {
    /// Host project path; becomes the host identity.
    pub project_path: PathBuf,
    /// Host environment block (token, port, collaborator URLs).
    pub environment: HashMap<String, String>,
    /// Dashboard URL to record on the host, when known.
    pub dashboard_url: Option<String>,
    /// Host program to start and supervise, if the orchestrator owns it.
    pub program: Option<HostProgram>,
}

struct HostRuntime {
    info: Mutex<Host>,
    supervisor: SessionSupervisor,
    cancel: CancellationToken,
    mutations: tokio::sync::Mutex<()>,
}

impl HostRuntime {
    fn snapshot(&self) -> Host {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct OrchestratorInner {
    config: Arc<GlobalConfig>,
    registry: SessionRegistry,
    bus: EventBus,
    hosts: Mutex<HashMap<HostId, Arc<HostRuntime>>>,
    debugger_ids: Arc<AtomicU64>,
    workspace: CancellationToken,
}

/// Workspace-scoped orchestrator context. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    /// Create a context for an opened workspace.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        let bus = EventBus::new(config.events.queue_capacity);
        Self {
            inner: Arc::new(OrchestratorInner {
                config: Arc::new(config),
                registry: SessionRegistry::new(),
                bus,
                hosts: Mutex::new(HashMap::new()),
                debugger_ids: Arc::new(AtomicU64::new(0)),
                workspace: CancellationToken::new(),
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    /// Session registry shared with every host.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Attach an event subscriber covering every host.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.bus.subscribe()
    }

    // ── Hosts ────────────────────────────────────────────────────────────────

    /// Bring up a host: bind its control channel and HTTP surface, and start
    /// the host program when one is given.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` if the host environment lacks the token or port,
    ///   the project path is already hosted, or a listener cannot be bound.
    /// - `AppError::Channel` if the control channel cannot be bound.
    /// - `AppError::Launch` if the host program cannot be started.
    /// - `AppError::Cancelled` once the workspace is closed.
    pub async fn launch_host(&self, spec: HostSpec) -> Result<Host> {
        if self.inner.workspace.is_cancelled() {
            return Err(AppError::Cancelled("workspace is closed".into()));
        }
        let id = HostId::new(&spec.project_path)?;
        let span = info_span!("launch_host", host = %id);

        async move {
            let endpoint = HostEndpoint::from_environment(&spec.environment)?;
            let dashboard_url = spec
                .dashboard_url
                .as_deref()
                .map(Url::parse)
                .transpose()
                .map_err(|err| AppError::Config(format!("invalid dashboard url: {err}")))?;
            if self.hosts_guard().contains_key(&id) {
                return Err(AppError::Config(format!("host {id} is already running")));
            }

            let bind_ip = self.inner.config.bind_ip()?;
            let control_listener =
                control_server::bind(SocketAddr::new(bind_ip, self.inner.config.control.port))
                    .await?;
            let http_listener =
                http::bind(SocketAddr::new(bind_ip, endpoint.session_port)).await?;
            let control_addr = control_listener.local_addr()?;
            let http_addr = http_listener.local_addr()?;

            let cancel = self.inner.workspace.child_token();
            let runtime = Arc::new(HostRuntime {
                info: Mutex::new(Host {
                    id: id.clone(),
                    endpoint: endpoint.clone(),
                    control_addr,
                    http_addr,
                    dashboard_url,
                    active: true,
                    connected: false,
                    started_at: Utc::now(),
                }),
                supervisor: self.build_supervisor(&id, endpoint.clone(), cancel.clone()),
                cancel: cancel.clone(),
                mutations: tokio::sync::Mutex::new(()),
            });

            {
                let mut hosts = self.hosts_guard();
                if hosts.contains_key(&id) {
                    return Err(AppError::Config(format!("host {id} is already running")));
                }
                self.inner.registry.register_host(&id);
                hosts.insert(id.clone(), Arc::clone(&runtime));
            }

            let commands: Arc<dyn HostCommands> =
                Arc::new(HostController::new(self.clone(), id.clone(), endpoint.token.clone()));
            drop(spawn_control_channel(
                control_listener,
                Arc::clone(&commands),
                self.inner.config.handshake_timeout(),
                cancel.clone(),
            ));
            drop(spawn_http_surface(http_listener, commands, cancel.clone()));

            if let Some(program) = &spec.program {
                match spawn_host_program(program, &id, &spec.environment, control_addr.port()) {
                    Ok(child) => {
                        let orchestrator = self.clone();
                        let host = id.clone();
                        drop(monitor_host_program(
                            id.clone(),
                            child,
                            cancel.clone(),
                            self.inner.config.stop_grace(),
                            move || {
                                tokio::spawn(async move {
                                    orchestrator.remove_host(&host).await;
                                });
                            },
                        ));
                    }
                    Err(err) => {
                        self.remove_host(&id).await;
                        return Err(err);
                    }
                }
            }

            info!(%control_addr, %http_addr, "host launched");
            Ok(runtime.snapshot())
        }
        .instrument(span)
        .await
    }

    /// Tear a host down: cancel its lifetime, stop every live process it
    /// owns, and drop its sessions. Returns `false` for an unknown host.
    pub async fn remove_host(&self, id: &HostId) -> bool {
        let Some(runtime) = self.hosts_guard().remove(id) else {
            return false;
        };
        let span = info_span!("remove_host", host = %id);
        async {
            runtime.cancel.cancel();
            let _mutations = runtime.mutations.lock().await;
            runtime.supervisor.shutdown().await;
            let dropped = self.inner.registry.unregister_host(id);
            {
                let mut info = runtime.info.lock().unwrap_or_else(PoisonError::into_inner);
                info.active = false;
                info.connected = false;
            }
            info!(sessions = dropped.len(), "host torn down");
        }
        .instrument(span)
        .await;
        true
    }

    /// Snapshot of one host.
    #[must_use]
    pub fn host(&self, id: &HostId) -> Option<Host> {
        self.hosts_guard().get(id).map(|runtime| runtime.snapshot())
    }

    /// Snapshots of every live host.
    #[must_use]
    pub fn hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self
            .hosts_guard()
            .values()
            .map(|runtime| runtime.snapshot())
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        hosts
    }

    /// Token that fires when the host's lifetime ends.
    #[must_use]
    pub fn host_lifetime(&self, id: &HostId) -> Option<CancellationToken> {
        self.hosts_guard().get(id).map(|runtime| runtime.cancel.clone())
    }

    /// Close the workspace: tear down every host.
    pub async fn close(&self) {
        let ids: Vec<HostId> = self.hosts_guard().keys().cloned().collect();
        join_all(ids.iter().map(|id| self.remove_host(id))).await;
        self.inner.workspace.cancel();
        info!("orchestrator closed");
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Record an announced session and, with auto-start on, launch it.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` for an invalid descriptor.
    /// - `AppError::NotFound` if the host is unknown.
    pub async fn announce_session(
        &self,
        host: &HostId,
        descriptor: SessionDescriptor,
    ) -> Result<AddOutcome> {
        descriptor.validate()?;
        let runtime = self.runtime(host)?;
        let _mutations = runtime.mutations.lock().await;
        let id = descriptor.id.clone();
        let outcome = self.inner.registry.add(host, descriptor)?;
        info!(host = %host, session_id = %id, ?outcome, "session announced");
        self.react(&runtime, id);
        Ok(outcome)
    }

    /// Replace a session's descriptor; a live process is replaced by a new
    /// generation.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` for an invalid descriptor.
    /// - `AppError::NotFound` if the host or session is unknown.
    pub async fn update_session(
        &self,
        host: &HostId,
        id: &str,
        mut descriptor: SessionDescriptor,
    ) -> Result<Session> {
        id.clone_into(&mut descriptor.id);
        descriptor.validate()?;
        let runtime = self.runtime(host)?;
        let _mutations = runtime.mutations.lock().await;
        let session = self.inner.registry.update(host, id, descriptor)?;
        info!(host = %host, session_id = id, revision = session.revision, "session updated");
        self.react(&runtime, id.to_owned());
        Ok(session)
    }

    /// Delete a session, stopping its process first. Returns `false` when
    /// the id was unknown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host is unknown.
    pub async fn delete_session(&self, host: &HostId, id: &str) -> Result<bool> {
        let runtime = self.runtime(host)?;
        let _mutations = runtime.mutations.lock().await;
        if !self.inner.registry.contains(host, id) {
            return Ok(false);
        }
        runtime.supervisor.retire(id).await;
        self.inner.registry.remove(host, id);
        info!(host = %host, session_id = id, "session deleted");
        Ok(true)
    }

    /// Explicitly start (or restart) a session.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the host or session is unknown.
    /// - The launch error when the launch fails.
    pub async fn start_session(&self, host: &HostId, id: &str) -> Result<SessionState> {
        self.runtime(host)?.supervisor.start(id).await
    }

    /// Explicitly stop a session; it stays down until started again.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host or session is unknown.
    pub async fn stop_session(&self, host: &HostId, id: &str) -> Result<SessionState> {
        self.runtime(host)?.supervisor.stop(id).await
    }

    /// Snapshot of a host's sessions, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host is unknown.
    pub fn sessions(&self, host: &HostId) -> Result<Vec<Session>> {
        self.inner.registry.get(host)
    }

    /// Observed state of a session.
    #[must_use]
    pub fn session_state(&self, host: &HostId, id: &str) -> Option<SessionState> {
        let runtime = self.runtime(host).ok()?;
        runtime.supervisor.state(id).or_else(|| {
            self.inner
                .registry
                .get_session(host, id)
                .map(|session| session.state)
        })
    }

    /// Live processes for a session: 0 or 1.
    #[must_use]
    pub fn live_process_count(&self, host: &HostId, id: &str) -> usize {
        self.runtime(host)
            .map_or(0, |runtime| runtime.supervisor.live_process_count(id))
    }

    /// Latest launch generation of a session.
    #[must_use]
    pub fn session_generation(&self, host: &HostId, id: &str) -> Option<u64> {
        self.runtime(host).ok()?.supervisor.generation(id)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    pub(crate) fn set_connected(&self, host: &HostId, connected: bool) {
        if let Some(runtime) = self.hosts_guard().get(host) {
            runtime
                .info
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .connected = connected;
        }
    }

    fn hosts_guard(&self) -> std::sync::MutexGuard<'_, HashMap<HostId, Arc<HostRuntime>>> {
        self.inner
            .hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime(&self, host: &HostId) -> Result<Arc<HostRuntime>> {
        self.hosts_guard()
            .get(host)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("host {host} is not running")))
    }

    fn build_supervisor(
        &self,
        host: &HostId,
        endpoint: HostEndpoint,
        cancel: CancellationToken,
    ) -> SessionSupervisor {
        let config = &self.inner.config;
        let launcher = Launcher::new(LaunchContext::new(
            Arc::clone(config),
            host.clone(),
            endpoint,
            Arc::clone(&self.inner.debugger_ids),
        ));
        let sink = EventSink::new(
            host.clone(),
            self.inner.bus.clone(),
            self.inner.registry.clone(),
        );
        SessionSupervisor::new(
            host.clone(),
            self.inner.registry.clone(),
            sink,
            launcher,
            config.launcher.auto_start,
            config.stop_grace(),
            cancel,
        )
    }

    /// Run the supervisor's reaction to a registry change as its own task.
    fn react(&self, runtime: &HostRuntime, id: String) {
        let supervisor = runtime.supervisor.clone();
        let span = info_span!("reconcile", session_id = %id);
        tokio::spawn(
            async move {
                if let Err(err) = supervisor.reconcile(&id).await {
                    warn!(%err, "session reaction failed");
                }
            }
            .instrument(span),
        );
    }
}
