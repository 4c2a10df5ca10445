//! Lifecycle and log events emitted for sessions.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::host::HostId;
use super::session::SessionState;

/// Why a session process ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The process exited on its own.
    Normal,
    /// The orchestrator requested the stop.
    KilledByOrchestrator,
    /// The process died from a signal nobody here sent.
    KilledExternally,
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Normal => "normal",
            Self::KilledByOrchestrator => "killed_by_orchestrator",
            Self::KilledExternally => "killed_externally",
        };
        f.write_str(text)
    }
}

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A process for the session is live.
    Started {
        /// OS process id.
        pid: Option<u32>,
        /// Launch generation the process belongs to.
        generation: u64,
    },
    /// One line of standard output.
    Stdout {
        /// Line text without the trailing newline.
        line: String,
    },
    /// One line of standard error.
    Stderr {
        /// Line text without the trailing newline.
        line: String,
    },
    /// The process ended.
    Exited {
        /// Exit code, absent when killed by a signal.
        exit_code: Option<i32>,
        /// Why the process ended.
        reason: ExitReason,
        /// Launch generation the process belonged to.
        generation: u64,
    },
    /// The supervisor moved the session to a new state.
    StateChanged {
        /// New state.
        state: SessionState,
        /// Launch error, when the change was caused by one.
        error: Option<String>,
    },
}

impl EventKind {
    /// Wire name used in notification records.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::Exited { .. } => "exited",
            Self::StateChanged { .. } => "state_changed",
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Started { pid, generation } => json!({ "pid": pid, "generation": generation }),
            Self::Stdout { line } | Self::Stderr { line } => json!({ "text": line }),
            Self::Exited {
                exit_code,
                reason,
                generation,
            } => json!({ "exit_code": exit_code, "reason": reason, "generation": generation }),
            Self::StateChanged { state, error } => json!({ "state": state, "error": error }),
        }
    }
}

/// Immutable lifecycle/log record for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Owning host.
    pub host: HostId,
    /// Session the event belongs to.
    pub session_id: String,
    /// Payload.
    pub kind: EventKind,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Stamp a new event with the current time.
    #[must_use]
    pub fn new(host: HostId, session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            host,
            session_id: session_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Wire representation streamed to notification listeners.
    #[must_use]
    pub fn to_record(&self) -> NotificationRecord {
        NotificationRecord {
            event_type: self.kind.type_name(),
            session_id: self.session_id.clone(),
            payload: self.kind.payload(),
            timestamp: self.timestamp,
        }
    }
}

/// Notification socket record: `{type, session_id, payload, timestamp}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationRecord {
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: &'static str,
    /// Session the event belongs to.
    pub session_id: String,
    /// Type-specific payload.
    pub payload: Value,
    /// Emission time (RFC 3339, UTC).
    pub timestamp: DateTime<Utc>,
}
