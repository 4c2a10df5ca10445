use std::collections::BTreeMap;

use devhost_orchestrator::models::host::HostId;
use devhost_orchestrator::models::session::{
    DesiredState, SessionDescriptor, SessionKind, SessionState,
};
use devhost_orchestrator::orchestrator::registry::{AddOutcome, SessionRegistry};
use devhost_orchestrator::AppError;

fn host() -> HostId {
    HostId::new("/work/Shop.AppHost/Shop.AppHost.csproj").expect("host id")
}

fn registry_with_host() -> (SessionRegistry, HostId) {
    let registry = SessionRegistry::new();
    let host = host();
    registry.register_host(&host);
    (registry, host)
}

fn descriptor(id: &str, command: &str) -> SessionDescriptor {
    SessionDescriptor::new(id, SessionKind::Executable, command)
}

#[test]
fn add_creates_and_get_orders_by_id() {
    let (registry, host) = registry_with_host();

    for id in ["web", "api", "worker"] {
        let outcome = registry.add(&host, descriptor(id, "app")).expect("add");
        assert_eq!(outcome, AddOutcome::Created);
    }

    let ids: Vec<String> = registry
        .get(&host)
        .expect("snapshot")
        .iter()
        .map(|s| s.id().to_owned())
        .collect();
    assert_eq!(ids, ["api", "web", "worker"]);
}

#[test]
fn duplicate_add_replaces_and_bumps_revision() {
    let (registry, host) = registry_with_host();
    registry.add(&host, descriptor("web", "v1")).expect("first add");

    let outcome = registry.add(&host, descriptor("web", "v2")).expect("second add");

    assert_eq!(outcome, AddOutcome::Replaced);
    let sessions = registry.get(&host).expect("snapshot");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].descriptor.command, "v2");
    assert_eq!(sessions[0].revision, 2);
}

#[test]
fn update_keeps_path_id_and_bumps_revision() {
    let (registry, host) = registry_with_host();
    registry.add(&host, descriptor("web", "v1")).expect("add");
    registry.set_desired(&host, "web", DesiredState::Stopped);

    let updated = registry
        .update(&host, "web", descriptor("ignored", "v2"))
        .expect("update");

    assert_eq!(updated.id(), "web");
    assert_eq!(updated.descriptor.command, "v2");
    assert_eq!(updated.revision, 2);
    assert_eq!(updated.desired, DesiredState::Running);
    assert!(registry.get_session(&host, "ignored").is_none());
}

#[test]
fn update_unknown_session_is_not_found() {
    let (registry, host) = registry_with_host();
    let err = registry
        .update(&host, "ghost", descriptor("ghost", "app"))
        .expect_err("unknown id");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn remove_unknown_session_is_noop() {
    let (registry, host) = registry_with_host();
    registry.add(&host, descriptor("web", "app")).expect("add");

    assert!(registry.remove(&host, "ghost").is_none());
    assert_eq!(registry.get(&host).expect("snapshot").len(), 1);

    let removed = registry.remove(&host, "web").expect("known id removed");
    assert_eq!(removed.id(), "web");
    assert!(!registry.contains(&host, "web"));
}

#[test]
fn unknown_host_is_not_found() {
    let registry = SessionRegistry::new();
    let host = host();

    assert!(matches!(registry.get(&host), Err(AppError::NotFound(_))));
    assert!(matches!(
        registry.add(&host, descriptor("web", "app")),
        Err(AppError::NotFound(_))
    ));
    assert!(registry.remove(&host, "web").is_none());
    assert!(!registry.contains(&host, "web"));
}

#[test]
fn unregister_host_returns_remaining_sessions() {
    let (registry, host) = registry_with_host();
    registry.add(&host, descriptor("web", "app")).expect("add");
    registry.add(&host, descriptor("api", "app")).expect("add");

    let remaining = registry.unregister_host(&host);

    assert_eq!(remaining.len(), 2);
    assert!(!registry.has_host(&host));
    assert!(registry.unregister_host(&host).is_empty());
}

#[test]
fn find_filters_snapshot() {
    let (registry, host) = registry_with_host();
    registry.add(&host, descriptor("web", "app")).expect("add");
    registry
        .add(&host, SessionDescriptor::new("cache", SessionKind::Container, "redis:7"))
        .expect("add");

    let containers = registry
        .find(&host, |s| s.kind() == SessionKind::Container)
        .expect("find");

    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id(), "cache");
}

#[test]
fn record_state_mirrors_supervisor() {
    let (registry, host) = registry_with_host();
    registry.add(&host, descriptor("web", "app")).expect("add");

    registry.record_state(&host, "web", SessionState::Running);
    registry.record_state(&host, "ghost", SessionState::Crashed);

    let session = registry.get_session(&host, "web").expect("session");
    assert_eq!(session.state, SessionState::Running);
}

#[test]
fn snapshot_matches_replayed_operations() {
    let (registry, host) = registry_with_host();
    let mut expected: BTreeMap<String, String> = BTreeMap::new();

    let ops: [(&str, Option<&str>); 8] = [
        ("a", Some("1")),
        ("b", Some("1")),
        ("a", Some("2")),
        ("c", Some("1")),
        ("b", None),
        ("d", None),
        ("c", Some("3")),
        ("b", Some("4")),
    ];

    for (id, command) in ops {
        match command {
            Some(command) => {
                registry.add(&host, descriptor(id, command)).expect("add");
                expected.insert(id.to_owned(), command.to_owned());
            }
            None => {
                registry.remove(&host, id);
                expected.remove(id);
            }
        }
    }

    let actual: BTreeMap<String, String> = registry
        .get(&host)
        .expect("snapshot")
        .into_iter()
        .map(|s| (s.descriptor.id.clone(), s.descriptor.command.clone()))
        .collect();
    assert_eq!(actual, expected);
}
