//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared orchestrator result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Orchestrator error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure, including missing
    /// required host environment variables.
    Config(String),
    /// A session process could not be launched (runtime missing, spawn failure).
    Launch(String),
    /// Debugger worker did not become ready or refused the attach request.
    Debugger(String),
    /// Control channel transport failure or host disconnect.
    Channel(String),
    /// Malformed message on the control channel or HTTP surface.
    Protocol(String),
    /// Requested host or session does not exist.
    NotFound(String),
    /// Caller presented a missing or wrong shared-secret token.
    Unauthorized(String),
    /// Operation aborted because the owning host lifetime ended.
    Cancelled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Stable machine-readable code used in HTTP error bodies and control
    /// channel rejections.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigurationError",
            Self::Launch(_) => "LaunchError",
            Self::Debugger(_) => "DebuggerError",
            Self::Channel(_) => "ChannelError",
            Self::Protocol(_) => "ProtocolError",
            Self::NotFound(_) => "NotFound",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Cancelled(_) => "Cancelled",
            Self::Io(_) => "IoError",
        }
    }

    /// Whether a failed launch with this error leaves the session `Crashed`.
    /// Anything else (cancellation in particular) leaves it `Stopped`.
    #[must_use]
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Self::Launch(_) | Self::Debugger(_) | Self::Config(_) | Self::Io(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Debugger(msg) => write!(f, "debugger: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
