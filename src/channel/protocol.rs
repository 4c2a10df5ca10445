//! Control channel wire messages.
//!
//! Every message is one JSON object per line, tagged by `type`. The host
//! opens with `hello`; after `welcome` it sends session notifications, each
//! carrying a `seq` the orchestrator echoes in its `ack`/`nack`.

use serde::{Deserialize, Serialize};

use crate::models::session::SessionDescriptor;
use crate::{AppError, Result};

/// Control protocol version spoken by this orchestrator.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent by the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Handshake: the shared secret and the protocol version.
    Hello {
        /// Shared secret from the host environment.
        token: String,
        /// Protocol version the host speaks.
        #[serde(default = "default_protocol_version")]
        protocol_version: u32,
    },
    /// A new (or re-announced) session.
    AnnounceSession {
        /// Request sequence number.
        seq: u64,
        /// Launch descriptor.
        session: SessionDescriptor,
    },
    /// Replace the descriptor of an existing session.
    UpdateSession {
        /// Request sequence number.
        seq: u64,
        /// Session to update.
        id: String,
        /// New launch descriptor.
        session: SessionDescriptor,
    },
    /// Remove a session and stop its process.
    DeleteSession {
        /// Request sequence number.
        seq: u64,
        /// Session to delete.
        id: String,
    },
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

impl HostMessage {
    /// Sequence number, for requests that carry one.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Hello { .. } => None,
            Self::AnnounceSession { seq, .. }
            | Self::UpdateSession { seq, .. }
            | Self::DeleteSession { seq, .. } => Some(*seq),
        }
    }
}

/// Error details carried by `nack` replies and HTTP error bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code().to_owned(),
            message: err.to_string(),
        }
    }
}

/// Messages sent by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorMessage {
    /// Handshake accepted.
    Welcome {
        /// Protocol version the orchestrator speaks.
        protocol_version: u32,
    },
    /// Handshake refused; the connection is closed after this line.
    Rejected {
        /// Why the handshake failed.
        reason: String,
    },
    /// Request applied.
    Ack {
        /// Echoed sequence number.
        seq: u64,
    },
    /// Request refused.
    Nack {
        /// Echoed sequence number.
        seq: u64,
        /// Failure details.
        error: ErrorBody,
    },
}

impl OrchestratorMessage {
    /// Serialize as one newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|err| AppError::Protocol(format!("cannot encode reply: {err}")))?;
        line.push('\n');
        Ok(line)
    }
}

/// Parse one inbound line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns `AppError::Protocol` for malformed JSON or unknown message types.
pub fn parse_host_line(line: &str) -> Result<Option<HostMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|err| AppError::Protocol(format!("malformed message: {err}")))
}

/// Best-effort extraction of `seq` from a line that failed to parse, so the
/// reply can still be correlated.
#[must_use]
pub fn salvage_seq(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line.trim())
        .ok()?
        .get("seq")?
        .as_u64()
}
