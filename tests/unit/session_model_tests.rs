use devhost_orchestrator::models::session::{
    Session, SessionDescriptor, SessionKind, SessionState,
};
use devhost_orchestrator::AppError;

// ── State machine ───────────────────────────────────────────────────────────

#[test]
fn launch_path_passes_through_starting() {
    assert!(SessionState::Pending.can_transition_to(SessionState::Starting));
    assert!(SessionState::Starting.can_transition_to(SessionState::Running));
    assert!(SessionState::Running.can_transition_to(SessionState::Stopped));
    assert!(SessionState::Running.can_transition_to(SessionState::Crashed));
    assert!(!SessionState::Pending.can_transition_to(SessionState::Running));
}

#[test]
fn launch_failure_goes_from_starting_to_crashed() {
    assert!(SessionState::Starting.can_transition_to(SessionState::Crashed));
}

#[test]
fn terminal_states_can_restart() {
    for terminal in [SessionState::Stopped, SessionState::Crashed] {
        assert!(terminal.is_terminal());
        assert!(terminal.can_transition_to(SessionState::Starting));
        assert!(terminal.can_transition_to(SessionState::Pending));
        assert!(!terminal.can_transition_to(SessionState::Running));
    }
}

#[test]
fn live_states_are_not_terminal() {
    for live in [SessionState::Pending, SessionState::Starting, SessionState::Running] {
        assert!(!live.is_terminal());
    }
    assert!(!SessionState::Running.can_transition_to(SessionState::Starting));
}

// ── Descriptor wire format ──────────────────────────────────────────────────

#[test]
fn descriptor_parses_camel_case_with_map_environment() {
    let json = r#"{
        "id": "web",
        "kind": "project",
        "command": "src/Web/Web.csproj",
        "args": ["--urls", "http://localhost:5000"],
        "workingDirectory": "/work",
        "environment": {"ASPNETCORE_ENVIRONMENT": "Development"},
        "launchProfile": "https",
        "debug": true
    }"#;
    let descriptor: SessionDescriptor = serde_json::from_str(json).expect("descriptor parses");

    assert_eq!(descriptor.id, "web");
    assert_eq!(descriptor.kind, SessionKind::Project);
    assert_eq!(descriptor.args.len(), 2);
    assert_eq!(
        descriptor.working_directory.as_deref(),
        Some(std::path::Path::new("/work"))
    );
    assert_eq!(
        descriptor.environment.get("ASPNETCORE_ENVIRONMENT").map(String::as_str),
        Some("Development")
    );
    assert_eq!(descriptor.launch_profile.as_deref(), Some("https"));
    assert!(descriptor.debug);
}

#[test]
fn descriptor_accepts_list_environment_last_write_wins() {
    let json = r#"{
        "id": "api",
        "kind": "executable",
        "command": "api",
        "environment": [
            {"name": "MODE", "value": "first"},
            {"name": "PORT", "value": "8080"},
            {"name": "MODE", "value": "second"}
        ]
    }"#;
    let descriptor: SessionDescriptor = serde_json::from_str(json).expect("descriptor parses");

    assert_eq!(descriptor.environment.len(), 2);
    assert_eq!(descriptor.environment["MODE"], "second");
    assert_eq!(descriptor.environment["PORT"], "8080");
}

#[test]
fn descriptor_defaults_optional_fields() {
    let descriptor: SessionDescriptor =
        serde_json::from_str(r#"{"kind":"container","command":"redis:7"}"#)
            .expect("descriptor parses");

    assert!(descriptor.id.is_empty());
    assert!(descriptor.args.is_empty());
    assert!(descriptor.environment.is_empty());
    assert!(descriptor.working_directory.is_none());
    assert!(!descriptor.debug);
}

#[test]
fn descriptor_rejects_unknown_kind() {
    let result = serde_json::from_str::<SessionDescriptor>(
        r#"{"id":"x","kind":"vm","command":"x"}"#,
    );
    assert!(result.is_err());
}

#[test]
fn validate_rejects_empty_id_and_command() {
    let empty_id = SessionDescriptor::new("", SessionKind::Executable, "app");
    assert!(matches!(empty_id.validate(), Err(AppError::Protocol(_))));

    let slash_id = SessionDescriptor::new("a/b", SessionKind::Executable, "app");
    assert!(matches!(slash_id.validate(), Err(AppError::Protocol(_))));

    let empty_command = SessionDescriptor::new("web", SessionKind::Executable, " ");
    assert!(matches!(empty_command.validate(), Err(AppError::Protocol(_))));

    let ok = SessionDescriptor::new("web", SessionKind::Executable, "app");
    assert!(ok.validate().is_ok());
}

#[test]
fn new_session_starts_pending_at_revision_one() {
    let session = Session::new(SessionDescriptor::new("web", SessionKind::Project, "app.exe"));
    assert_eq!(session.state, SessionState::Pending);
    assert_eq!(session.revision, 1);
    assert_eq!(session.id(), "web");
    assert_eq!(session.kind(), SessionKind::Project);
}
