//! Host model: identity, control endpoint, and environment parsing.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::{AppError, Result};

/// Shared secret the host presents on every control connection.
pub const DEBUG_SESSION_TOKEN: &str = "DEBUG_SESSION_TOKEN";
/// `host:port` (or bare port) of the session HTTP surface.
pub const DEBUG_SESSION_PORT: &str = "DEBUG_SESSION_PORT";
/// Resource service endpoint forwarded to sessions.
pub const DOTNET_RESOURCE_SERVICE_ENDPOINT_URL: &str = "DOTNET_RESOURCE_SERVICE_ENDPOINT_URL";
/// OTLP collector endpoint forwarded to sessions.
pub const DOTNET_DASHBOARD_OTLP_ENDPOINT_URL: &str = "DOTNET_DASHBOARD_OTLP_ENDPOINT_URL";
/// Container runtime override declared by the host.
pub const DOTNET_ASPIRE_CONTAINER_RUNTIME: &str = "DOTNET_ASPIRE_CONTAINER_RUNTIME";
/// Control channel port exported to the host program.
pub const DEVHOST_CONTROL_PORT: &str = "DEVHOST_CONTROL_PORT";

/// Host identity: the absolute project path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HostId(PathBuf);

impl HostId {
    /// Build a host identity, making the project path absolute.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the path is empty or cannot be made absolute.
    pub fn new(project_path: impl AsRef<Path>) -> Result<Self> {
        let path = project_path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(AppError::Config("host project path must not be empty".into()));
        }
        let absolute = std::path::absolute(path).map_err(|err| {
            AppError::Config(format!(
                "cannot resolve host project path {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self(absolute))
    }

    /// Absolute project path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Short label used in container names and log lines.
    #[must_use]
    pub fn slug(&self) -> String {
        let stem = self
            .0
            .file_stem()
            .map_or_else(|| "host".to_owned(), |s| s.to_string_lossy().into_owned());
        stem.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect()
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Control endpoint and collaborator URLs read from the host's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HostEndpoint {
    /// Shared secret for the control channel and HTTP surface.
    #[serde(skip)]
    pub token: String,
    /// Port of the session HTTP surface.
    pub session_port: u16,
    /// Resource service endpoint, when the host exposes one.
    pub resource_service_url: Option<Url>,
    /// OTLP collector endpoint, when the host exposes one.
    pub otlp_endpoint_url: Option<Url>,
    /// Container runtime override.
    pub container_runtime: Option<String>,
}

impl HostEndpoint {
    /// Parse the endpoint from a host environment block.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the token or port is missing or
    /// malformed, or when an optional URL is present but invalid.
    pub fn from_environment(env: &HashMap<String, String>) -> Result<Self> {
        let token = env
            .get(DEBUG_SESSION_TOKEN)
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .ok_or_else(|| AppError::Config(format!("{DEBUG_SESSION_TOKEN} is not set")))?;

        let raw_port = env
            .get(DEBUG_SESSION_PORT)
            .ok_or_else(|| AppError::Config(format!("{DEBUG_SESSION_PORT} is not set")))?;
        let session_port = parse_session_port(raw_port)?;

        Ok(Self {
            token,
            session_port,
            resource_service_url: optional_url(env, DOTNET_RESOURCE_SERVICE_ENDPOINT_URL)?,
            otlp_endpoint_url: optional_url(env, DOTNET_DASHBOARD_OTLP_ENDPOINT_URL)?,
            container_runtime: env
                .get(DOTNET_ASPIRE_CONTAINER_RUNTIME)
                .filter(|v| !v.trim().is_empty())
                .cloned(),
        })
    }
}

/// Accepts `localhost:1234`, `1234`, or `http://localhost:1234`.
fn parse_session_port(raw: &str) -> Result<u16> {
    let trimmed = raw.trim();
    let port_text = trimmed.rsplit(':').next().unwrap_or(trimmed);
    port_text.trim_end_matches('/').parse::<u16>().map_err(|err| {
        AppError::Config(format!("{DEBUG_SESSION_PORT} '{raw}' has no valid port: {err}"))
    })
}

fn optional_url(env: &HashMap<String, String>, key: &str) -> Result<Option<Url>> {
    match env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => Url::parse(value)
            .map(Some)
            .map_err(|err| AppError::Config(format!("{key} '{value}' is not a valid url: {err}"))),
    }
}

/// Snapshot of one orchestrated application host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Host {
    /// Identity (absolute project path).
    pub id: HostId,
    /// Endpoint read from the host environment.
    pub endpoint: HostEndpoint,
    /// Bound control channel address.
    pub control_addr: SocketAddr,
    /// Bound HTTP surface address.
    pub http_addr: SocketAddr,
    /// Dashboard URL, when known.
    pub dashboard_url: Option<Url>,
    /// Whether the host lifetime is still alive.
    pub active: bool,
    /// Whether a host has completed the control channel handshake.
    pub connected: bool,
    /// Launch timestamp.
    pub started_at: DateTime<Utc>,
}
