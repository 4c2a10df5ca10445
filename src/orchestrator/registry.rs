//! Session registry: declared sessions per host.
//!
//! Each host owns an ordered map of sessions keyed by id, guarded by its own
//! lock. Mutations replace entries under the write lock; readers always get
//! an owned snapshot, so they observe either the pre- or post-mutation map.
//!
//! The registry stores what the host declared. Observed process state lives
//! in the supervisor; the `state` field on [`Session`] is a mirror the
//! supervisor keeps current for readers of the registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;

use crate::models::host::HostId;
use crate::models::session::{DesiredState, Session, SessionDescriptor, SessionState};
use crate::{AppError, Result};

type HostSessions = Arc<RwLock<BTreeMap<String, Session>>>;

/// Outcome of [`SessionRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new session entry was created.
    Created,
    /// The id already existed; its descriptor was replaced.
    Replaced,
}

/// Thread-safe registry of announced sessions.
///
/// Cheap to clone; all clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    hosts: Arc<RwLock<HashMap<HostId, HostSessions>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a host. Idempotent.
    pub fn register_host(&self, host: &HostId) {
        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(host.clone())
            .or_default();
    }

    /// Stop tracking a host, returning the sessions it still had.
    pub fn unregister_host(&self, host: &HostId) -> Vec<Session> {
        let removed = self
            .hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(host);
        removed.map_or_else(Vec::new, |sessions| {
            let mut guard = sessions.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard).into_values().collect()
        })
    }

    /// Whether the host is tracked.
    #[must_use]
    pub fn has_host(&self, host: &HostId) -> bool {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(host)
    }

    fn host_sessions(&self, host: &HostId) -> Result<HostSessions> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("host {host} is not registered")))
    }

    /// Add a session. A duplicate id replaces the descriptor (last wins) and
    /// bumps the revision; no duplicate entry is ever created.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host is unknown.
    pub fn add(&self, host: &HostId, descriptor: SessionDescriptor) -> Result<AddOutcome> {
        let sessions = self.host_sessions(host)?;
        let mut guard = sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = guard.get_mut(&descriptor.id) {
            replace_descriptor(existing, descriptor);
            Ok(AddOutcome::Replaced)
        } else {
            guard.insert(descriptor.id.clone(), Session::new(descriptor));
            Ok(AddOutcome::Created)
        }
    }

    /// Replace the descriptor of an existing session, preserving its identity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host or session is unknown.
    pub fn update(
        &self,
        host: &HostId,
        id: &str,
        mut descriptor: SessionDescriptor,
    ) -> Result<Session> {
        let sessions = self.host_sessions(host)?;
        let mut guard = sessions.write().unwrap_or_else(PoisonError::into_inner);
        let existing = guard
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found on {host}")))?;
        id.clone_into(&mut descriptor.id);
        replace_descriptor(existing, descriptor);
        Ok(existing.clone())
    }

    /// Remove a session. Unknown ids (or hosts) are a no-op.
    pub fn remove(&self, host: &HostId, id: &str) -> Option<Session> {
        let sessions = self.host_sessions(host).ok()?;
        let mut guard = sessions.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(id)
    }

    /// Snapshot of all sessions for a host, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host is unknown.
    pub fn get(&self, host: &HostId) -> Result<Vec<Session>> {
        let sessions = self.host_sessions(host)?;
        let guard = sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.values().cloned().collect())
    }

    /// Snapshot of the sessions matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the host is unknown.
    pub fn find<P>(&self, host: &HostId, predicate: P) -> Result<Vec<Session>>
    where
        P: Fn(&Session) -> bool,
    {
        let sessions = self.host_sessions(host)?;
        let guard = sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.values().filter(|s| predicate(s)).cloned().collect())
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get_session(&self, host: &HostId, id: &str) -> Option<Session> {
        let sessions = self.host_sessions(host).ok()?;
        let guard = sessions.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(id).cloned()
    }

    /// Whether a session currently exists.
    #[must_use]
    pub fn contains(&self, host: &HostId, id: &str) -> bool {
        self.host_sessions(host).is_ok_and(|sessions| {
            sessions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(id)
        })
    }

    /// Record the declared intent for a session. No-op for unknown sessions.
    pub fn set_desired(&self, host: &HostId, id: &str, desired: DesiredState) {
        self.with_session(host, id, |session| session.desired = desired);
    }

    /// Mirror the supervisor's observed state. No-op for unknown sessions.
    pub fn record_state(&self, host: &HostId, id: &str, state: SessionState) {
        self.with_session(host, id, |session| session.state = state);
    }

    fn with_session<F>(&self, host: &HostId, id: &str, apply: F)
    where
        F: FnOnce(&mut Session),
    {
        let Ok(sessions) = self.host_sessions(host) else {
            return;
        };
        let mut guard = sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = guard.get_mut(id) {
            apply(session);
            session.updated_at = Utc::now();
        }
    }
}

fn replace_descriptor(existing: &mut Session, descriptor: SessionDescriptor) {
    existing.descriptor = descriptor;
    existing.revision += 1;
    existing.desired = DesiredState::Running;
    existing.updated_at = Utc::now();
}
