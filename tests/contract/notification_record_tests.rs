//! Wire shape of records streamed on the notification websocket.

use devhost_orchestrator::models::event::{EventKind, ExitReason, SessionEvent};
use devhost_orchestrator::models::host::HostId;
use devhost_orchestrator::models::session::SessionState;
use serde_json::{json, Value};

fn record(kind: EventKind) -> Value {
    let host = HostId::new("/work/App.csproj").expect("host id");
    let event = SessionEvent::new(host, "web", kind);
    serde_json::to_value(event.to_record()).expect("serializes")
}

#[test]
fn record_has_exactly_four_top_level_fields() {
    let value = record(EventKind::Stdout { line: "hi".into() });
    let object = value.as_object().expect("object");
    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["payload", "session_id", "timestamp", "type"]);
    assert_eq!(value["session_id"], "web");
}

#[test]
fn timestamp_is_rfc3339_utc() {
    let value = record(EventKind::Stdout { line: "hi".into() });
    let text = value["timestamp"].as_str().expect("string timestamp");
    let parsed = chrono::DateTime::parse_from_rfc3339(text).expect("rfc3339");
    assert_eq!(parsed.offset().local_minus_utc(), 0);
}

#[test]
fn started_payload() {
    let value = record(EventKind::Started {
        pid: Some(4242),
        generation: 3,
    });
    assert_eq!(value["type"], "started");
    assert_eq!(value["payload"], json!({"pid": 4242, "generation": 3}));
}

#[test]
fn output_payloads() {
    let out = record(EventKind::Stdout { line: "ready".into() });
    assert_eq!(out["type"], "stdout");
    assert_eq!(out["payload"], json!({"text": "ready"}));

    let err = record(EventKind::Stderr { line: "warn".into() });
    assert_eq!(err["type"], "stderr");
    assert_eq!(err["payload"], json!({"text": "warn"}));
}

#[test]
fn exited_payload() {
    let value = record(EventKind::Exited {
        exit_code: None,
        reason: ExitReason::KilledByOrchestrator,
        generation: 2,
    });
    assert_eq!(value["type"], "exited");
    assert_eq!(
        value["payload"],
        json!({"exit_code": null, "reason": "killed_by_orchestrator", "generation": 2})
    );
}

#[test]
fn state_changed_payload() {
    let value = record(EventKind::StateChanged {
        state: SessionState::Crashed,
        error: Some("launch: executable 'x' not found".into()),
    });
    assert_eq!(value["type"], "state_changed");
    assert_eq!(value["payload"]["state"], "crashed");
    assert_eq!(value["payload"]["error"], "launch: executable 'x' not found");
}
