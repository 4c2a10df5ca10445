//! Session model and lifecycle helpers.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{AppError, Result};

/// Workload category announced by the host; selects the launch strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// A project run through the managed runtime (debuggable).
    Project,
    /// A plain executable.
    Executable,
    /// A containerized workload started through the container runtime.
    Container,
}

impl SessionKind {
    /// Every kind the orchestrator can launch.
    pub const ALL: [Self; 3] = [Self::Project, Self::Executable, Self::Container];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Executable => "executable",
            Self::Container => "container",
        }
    }
}

/// Observed lifecycle state of a session's process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Announced, not launched yet.
    Pending,
    /// Launch in flight.
    Starting,
    /// Process confirmed alive.
    Running,
    /// Clean exit or explicit stop.
    Stopped,
    /// Non-zero exit, external kill, or launch failure.
    Crashed,
}

impl SessionState {
    /// Whether the state ends a run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Starting` is only reachable from `Pending` or a terminal state, so a
    /// launch never skips it. `Starting → Stopped` covers a launch abandoned
    /// because the host went away.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Stopped | Self::Crashed, Self::Starting)
                | (Self::Starting, Self::Running | Self::Crashed | Self::Stopped)
                | (Self::Running, Self::Stopped | Self::Crashed)
                | (Self::Stopped | Self::Crashed, Self::Pending)
                | (Self::Pending, Self::Stopped)
        )
    }

    /// Wire name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }
}

/// Launch descriptor as announced by the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    /// Host-assigned identifier, unique within the host.
    #[serde(default)]
    pub id: String,
    /// Launch strategy selector.
    pub kind: SessionKind,
    /// Program, project file, or container image.
    pub command: String,
    /// Ordered arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Environment supplied by the host; keys unique, last write wins.
    #[serde(default, deserialize_with = "deserialize_environment")]
    pub environment: BTreeMap<String, String>,
    /// Launch profile passed to the managed runtime.
    #[serde(default)]
    pub launch_profile: Option<String>,
    /// Launch under the debugger.
    #[serde(default)]
    pub debug: bool,
}

impl SessionDescriptor {
    /// Minimal descriptor with no arguments or environment.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: SessionKind, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            command: command.into(),
            args: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
            launch_profile: None,
            debug: false,
        }
    }

    /// Builder-style argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style environment entry.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Validate the fields the launcher relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the id is empty or contains `/`, or the
    /// command is empty.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Protocol("session id must not be empty".into()));
        }
        if self.id.contains('/') {
            return Err(AppError::Protocol(format!(
                "session id '{}' must not contain '/'",
                self.id
            )));
        }
        if self.command.trim().is_empty() {
            return Err(AppError::Protocol(format!(
                "session '{}' has an empty command",
                self.id
            )));
        }
        Ok(())
    }
}

/// Process-level intent declared for a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    /// The session should have a live process.
    Running,
    /// The session was stopped explicitly and stays down.
    Stopped,
}

/// Registry entry for one announced session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Current launch descriptor.
    pub descriptor: SessionDescriptor,
    /// Bumped every time the descriptor is replaced.
    pub revision: u64,
    /// Declared intent.
    pub desired: DesiredState,
    /// Last state reported by the supervisor (mirror, not the source of truth).
    pub state: SessionState,
    /// Announcement timestamp.
    pub created_at: DateTime<Utc>,
    /// Last descriptor or state change.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a freshly announced session.
    #[must_use]
    pub fn new(descriptor: SessionDescriptor) -> Self {
        let now = Utc::now();
        Self {
            descriptor,
            revision: 1,
            desired: DesiredState::Running,
            state: SessionState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Session kind.
    #[must_use]
    pub fn kind(&self) -> SessionKind {
        self.descriptor.kind
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvironmentWire {
    Map(BTreeMap<String, String>),
    List(Vec<EnvironmentEntry>),
}

#[derive(Deserialize)]
struct EnvironmentEntry {
    name: String,
    #[serde(default)]
    value: String,
}

/// Accept either `{"KEY": "value"}` or `[{"name": "KEY", "value": "value"}]`.
fn deserialize_environment<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<EnvironmentWire>::deserialize(deserializer)?;
    Ok(match wire {
        None => BTreeMap::new(),
        Some(EnvironmentWire::Map(map)) => map,
        Some(EnvironmentWire::List(entries)) => entries
            .into_iter()
            .map(|entry| (entry.name, entry.value))
            .collect(),
    })
}
