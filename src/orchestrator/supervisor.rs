//! Lifecycle supervisor: owns every live process for one host.
//!
//! Each session has a slot holding its observed state, its launch
//! generation, and at most one live process. Lifecycle operations on a slot
//! are serialized by an async lock so a stop and a relaunch can never
//! interleave; exit notifications from old generations are ignored.
//!
//! Every state change is emitted as a `state_changed` event and mirrored
//! into the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use crate::events::EventSink;
use crate::launcher::{Launcher, ProcessExit, ProcessHandle};
use crate::models::event::EventKind;
use crate::models::host::HostId;
use crate::models::session::{DesiredState, Session, SessionState};
use crate::{AppError, Result};

#[derive(Debug)]
struct LiveProcess {
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct SlotState {
    state: SessionState,
    generation: u64,
    launched_revision: Option<u64>,
    live: Option<LiveProcess>,
}

#[derive(Debug)]
struct SessionSlot {
    ops: tokio::sync::Mutex<()>,
    inner: Mutex<SlotState>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            ops: tokio::sync::Mutex::new(()),
            inner: Mutex::new(SlotState {
                state: SessionState::Pending,
                generation: 0,
                launched_revision: None,
                live: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct SupervisorInner {
    host: HostId,
    registry: SessionRegistry,
    sink: EventSink,
    launcher: Launcher,
    auto_start: bool,
    grace: Duration,
    cancel: CancellationToken,
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

/// Per-host process supervisor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl SessionSupervisor {
    /// Create a supervisor for `host`.
    ///
    /// `cancel` is the host lifetime: once it fires, in-flight launches are
    /// abandoned and live processes are stopped.
    #[must_use]
    pub fn new(
        host: HostId,
        registry: SessionRegistry,
        sink: EventSink,
        launcher: Launcher,
        auto_start: bool,
        grace: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                host,
                registry,
                sink,
                launcher,
                auto_start,
                grace,
                cancel,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Observed state of a session, if the supervisor has seen it.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.existing_slot(id).map(|slot| slot.lock().state)
    }

    /// Latest launch generation of a session (0 before the first launch).
    #[must_use]
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.existing_slot(id).map(|slot| slot.lock().generation)
    }

    /// Number of live processes for a session: 0 or 1.
    #[must_use]
    pub fn live_process_count(&self, id: &str) -> usize {
        self.existing_slot(id)
            .map_or(0, |slot| usize::from(slot.lock().live.is_some()))
    }


    // ── Reactions ────────────────────────────────────────────────────────────

    /// Bring a session's process in line with its registry entry.
    ///
    /// - Entry gone: any live process is stopped and the slot forgotten.
    /// - Live process from an older revision: stopped, then relaunched.
    /// - Not launched for the current revision: launched (when auto-start
    ///   is on, or when a previous revision had been launched).
    /// - Already ended for the current revision: left alone.
    ///
    /// # Errors
    ///
    /// Returns the launch error when a launch was attempted and failed. The
    /// session is `Crashed` in that case.
    pub async fn reconcile(&self, id: &str) -> Result<SessionState> {
        let slot = self.slot(id);
        let _ops = slot.ops.lock().await;

        let Some(session) = self.inner.registry.get_session(&self.inner.host, id) else {
            self.terminate_live(&slot).await;
            self.forget(id);
            return Ok(SessionState::Stopped);
        };

        let (has_live, launched_revision, state) = {
            let st = slot.lock();
            (st.live.is_some(), st.launched_revision, st.state)
        };

        if launched_revision == Some(session.revision) {
            return Ok(state);
        }
        if session.desired == DesiredState::Stopped {
            return Ok(state);
        }
        if has_live {
            debug!(session_id = id, revision = session.revision, "descriptor changed, replacing process");
            self.terminate_live(&slot).await;
        } else if !self.inner.auto_start && launched_revision.is_none() {
            return Ok(state);
        }

        self.launch_locked(&slot, &session).await
    }

    /// Explicit start. Restarts a session from any terminal state; a session
    /// that is already running is left alone.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session is not registered.
    /// - The launch error when the launch fails.
    pub async fn start(&self, id: &str) -> Result<SessionState> {
        if !self.inner.registry.contains(&self.inner.host, id) {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        let slot = self.slot(id);
        let _ops = slot.ops.lock().await;

        self.inner
            .registry
            .set_desired(&self.inner.host, id, DesiredState::Running);
        let Some(session) = self.inner.registry.get_session(&self.inner.host, id) else {
            // Deleted while waiting for the lock.
            self.forget(id);
            return Err(AppError::NotFound(format!("session {id} not found")));
        };

        let has_live = slot.lock().live.is_some();
        if has_live {
            return Ok(SessionState::Running);
        }
        self.launch_locked(&slot, &session).await
    }

    /// Explicit stop: graceful termination, then the session stays down
    /// until started again or its descriptor changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not registered.
    pub async fn stop(&self, id: &str) -> Result<SessionState> {
        if !self.inner.registry.contains(&self.inner.host, id) {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        let slot = self.slot(id);
        let _ops = slot.ops.lock().await;

        self.inner
            .registry
            .set_desired(&self.inner.host, id, DesiredState::Stopped);
        self.terminate_live(&slot).await;
        if slot.lock().state == SessionState::Pending {
            self.transition(id, &slot, SessionState::Stopped, None);
        }
        let state = slot.lock().state;
        Ok(state)
    }

    /// Stop a session that is about to be deleted and drop its slot.
    ///
    /// Call while the session is still registered so its final events are
    /// delivered.
    pub async fn retire(&self, id: &str) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        let _ops = slot.ops.lock().await;
        self.terminate_live(&slot).await;
        self.forget(id);
    }

    /// Stop every live process. Used when the host goes away; callers cancel
    /// the host token first so in-flight launches give up.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Arc<SessionSlot>)> = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        join_all(slots.into_iter().map(|(id, slot)| async move {
            let _ops = slot.ops.lock().await;
            self.terminate_live(&slot).await;
            let state = slot.lock().state;
            if state == SessionState::Pending {
                self.transition(&id, &slot, SessionState::Stopped, None);
            }
        }))
        .await;
        info!(host = %self.inner.host, "supervisor shut down");
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn slot(&self, id: &str) -> Arc<SessionSlot> {
        let mut slots = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(id.to_owned())
                .or_insert_with(|| Arc::new(SessionSlot::new())),
        )
    }

    fn existing_slot(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn forget(&self, id: &str) {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Launch a new generation. Caller holds the slot's ops lock.
    async fn launch_locked(&self, slot: &Arc<SessionSlot>, session: &Session) -> Result<SessionState> {
        let id = session.id();
        let generation = {
            let mut st = slot.lock();
            st.generation += 1;
            st.launched_revision = Some(session.revision);
            st.generation
        };
        self.transition(id, slot, SessionState::Starting, None);

        let launched = self
            .inner
            .launcher
            .launch(&session.descriptor, generation, &self.inner.cancel)
            .await;

        let handle = match launched {
            Ok(handle) if self.inner.cancel.is_cancelled() => {
                handle.abort().await;
                self.transition(id, slot, SessionState::Stopped, None);
                return Err(AppError::Cancelled("host is shutting down".into()));
            }
            Ok(handle) => handle,
            Err(err) if err.is_launch_failure() => {
                warn!(host = %self.inner.host, session_id = id, generation, %err, "launch failed");
                self.transition(id, slot, SessionState::Crashed, Some(err.to_string()));
                return Err(err);
            }
            Err(err) => {
                debug!(host = %self.inner.host, session_id = id, generation, %err, "launch abandoned");
                self.transition(id, slot, SessionState::Stopped, None);
                return Err(err);
            }
        };

        self.track(id, slot, handle);
        Ok(SessionState::Running)
    }

    /// Register the live process, announce it, then start supervising it.
    fn track(&self, id: &str, slot: &Arc<SessionSlot>, handle: ProcessHandle) {
        let generation = handle.generation();
        let pid = handle.pid();
        let (stop_tx, stop_rx) = oneshot::channel();

        slot.lock().live = Some(LiveProcess {
            generation,
            stop_tx: Some(stop_tx),
            task: None,
        });
        debug!(
            host = %self.inner.host,
            session_id = id,
            generation,
            ?pid,
            debugging = handle.is_debugging(),
            "session process started"
        );
        self.inner
            .sink
            .emit(id, EventKind::Started { pid, generation });
        self.transition(id, slot, SessionState::Running, None);

        let supervisor = self.clone();
        let sink = self.inner.sink.clone();
        let cancel = self.inner.cancel.clone();
        let grace = self.inner.grace;
        let session_id = id.to_owned();
        let task = tokio::spawn(async move {
            let exit = handle.supervise(sink, stop_rx, cancel, grace).await;
            supervisor.on_exit(&session_id, generation, exit);
        });

        let mut st = slot.lock();
        match st.live.as_mut() {
            Some(live) if live.generation == generation => live.task = Some(task),
            // Already exited and cleaned up.
            _ => drop(task),
        }
    }

    fn on_exit(&self, id: &str, generation: u64, exit: ProcessExit) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        {
            let mut st = slot.lock();
            if st.live.as_ref().map(|live| live.generation) != Some(generation) {
                debug!(session_id = id, generation, "ignoring exit of a stale generation");
                return;
            }
            st.live = None;
        }
        self.inner.sink.emit(
            id,
            EventKind::Exited {
                exit_code: exit.exit_code,
                reason: exit.reason,
                generation,
            },
        );
        self.transition(id, &slot, exit.terminal_state(), None);
    }

    /// Stop the live process, if any, and wait until its exit is recorded.
    async fn terminate_live(&self, slot: &Arc<SessionSlot>) {
        let (stop_tx, task) = {
            let mut st = slot.lock();
            match st.live.as_mut() {
                Some(live) => (live.stop_tx.take(), live.task.take()),
                None => return,
            }
        };
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(host = %self.inner.host, %err, "process supervision task failed");
            }
        }
    }

    fn transition(&self, id: &str, slot: &SessionSlot, next: SessionState, error: Option<String>) {
        {
            let mut st = slot.lock();
            if st.state == next {
                return;
            }
            if !st.state.can_transition_to(next) {
                warn!(
                    session_id = id,
                    from = st.state.as_str(),
                    to = next.as_str(),
                    "ignoring invalid state transition"
                );
                return;
            }
            st.state = next;
        }
        debug!(host = %self.inner.host, session_id = id, state = next.as_str(), "session state changed");
        self.inner
            .registry
            .record_state(&self.inner.host, id, next);
        self.inner
            .sink
            .emit(id, EventKind::StateChanged { state: next, error });
    }
}
