//! Global configuration parsing and validation.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Control channel listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ControlConfig {
    /// Address the control channel and HTTP surface bind to.
    pub bind_address: String,
    /// Control channel TCP port; 0 lets the OS pick one per host.
    pub port: u16,
    /// Seconds a connected host has to send its `hello` line.
    pub handshake_timeout_seconds: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 0,
            handshake_timeout_seconds: 10,
        }
    }
}

/// Process launcher settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct LauncherConfig {
    /// Launch sessions as soon as they are announced.
    pub auto_start: bool,
    /// Grace period between the termination signal and a hard kill.
    pub stop_grace_seconds: u64,
    /// Container runtime binary used for `container` sessions.
    pub container_runtime: String,
    /// Managed runtime CLI used for `project` sessions.
    pub dotnet_cli: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            stop_grace_seconds: 5,
            container_runtime: "docker".into(),
            dotnet_cli: "dotnet".into(),
        }
    }
}

/// Debugger worker settings for debug launches.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct DebuggerConfig {
    /// Debugger worker binary. Debug launches fail when unset.
    pub worker_command: Option<String>,
    /// Extra arguments passed to the worker.
    pub worker_args: Vec<String>,
    /// Number of readiness probes before the launch is abandoned.
    pub ready_attempts: u32,
    /// Delay between readiness probes, in milliseconds.
    pub ready_delay_ms: u64,
    /// Seconds to wait for the worker to confirm the attach request.
    pub attach_timeout_seconds: u64,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            worker_command: None,
            worker_args: Vec::new(),
            ready_attempts: 10,
            ready_delay_ms: 500,
            attach_timeout_seconds: 30,
        }
    }
}

impl DebuggerConfig {
    /// Delay between readiness probes.
    #[must_use]
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }

    /// Maximum wait for the attach confirmation.
    #[must_use]
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_seconds)
    }
}

/// Event fan-out settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// Global configuration parsed from `devhost.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Control channel listener settings.
    pub control: ControlConfig,
    /// Process launcher settings.
    pub launcher: LauncherConfig,
    /// Debugger worker settings.
    pub debugger: DebuggerConfig,
    /// Event fan-out settings.
    pub events: EventsConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed bind address for host-facing listeners.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `control.bind_address` is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr> {
        self.control.bind_address.parse().map_err(|err| {
            AppError::Config(format!(
                "control.bind_address '{}' invalid: {err}",
                self.control.bind_address
            ))
        })
    }

    /// Grace period before a stopping process is force-killed.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.launcher.stop_grace_seconds)
    }

    /// Time a connected host has to complete the handshake.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.control.handshake_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        self.bind_ip()?;

        if self.events.queue_capacity == 0 {
            return Err(AppError::Config(
                "events.queue_capacity must be greater than zero".into(),
            ));
        }

        if self.debugger.ready_attempts == 0 {
            return Err(AppError::Config(
                "debugger.ready_attempts must be greater than zero".into(),
            ));
        }

        if self.control.handshake_timeout_seconds == 0 {
            return Err(AppError::Config(
                "control.handshake_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.launcher.container_runtime.trim().is_empty() {
            return Err(AppError::Config(
                "launcher.container_runtime must not be empty".into(),
            ));
        }

        Ok(())
    }
}
