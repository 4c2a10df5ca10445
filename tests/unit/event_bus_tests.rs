use devhost_orchestrator::events::{EventBus, EventSink};
use devhost_orchestrator::models::event::EventKind;
use devhost_orchestrator::models::host::HostId;
use devhost_orchestrator::models::session::{SessionDescriptor, SessionKind};
use devhost_orchestrator::orchestrator::registry::SessionRegistry;

fn stdout(line: &str) -> EventKind {
    EventKind::Stdout { line: line.into() }
}

fn line_of(kind: &EventKind) -> &str {
    match kind {
        EventKind::Stdout { line } | EventKind::Stderr { line } => line,
        other => panic!("unexpected event {other:?}"),
    }
}

fn sink_with_session(bus: &EventBus, id: &str) -> EventSink {
    let registry = SessionRegistry::new();
    let host = HostId::new("/work/App.csproj").expect("host id");
    registry.register_host(&host);
    registry
        .add(&host, SessionDescriptor::new(id, SessionKind::Executable, "app"))
        .expect("add");
    EventSink::new(host, bus.clone(), registry)
}

#[tokio::test]
async fn subscribers_have_independent_cursors() {
    let bus = EventBus::new(16);
    let sink = sink_with_session(&bus, "web");

    let mut early = bus.subscribe();
    assert!(sink.emit("web", stdout("one")));
    let mut late = bus.subscribe();
    assert!(sink.emit("web", stdout("two")));

    assert_eq!(line_of(&early.recv().await.expect("event").kind), "one");
    assert_eq!(line_of(&early.recv().await.expect("event").kind), "two");
    assert_eq!(line_of(&late.recv().await.expect("event").kind), "two");
    assert!(late.try_recv().is_none());
}

#[tokio::test]
async fn lagging_subscriber_drops_oldest() {
    let bus = EventBus::new(4);
    let sink = sink_with_session(&bus, "web");
    let mut slow = bus.subscribe();
    let mut fast = bus.subscribe();

    for i in 0..10 {
        sink.emit("web", stdout(&i.to_string()));
        assert_eq!(
            line_of(&fast.recv().await.expect("fast keeps up").kind),
            i.to_string()
        );
    }

    let mut received = Vec::new();
    while let Some(event) = slow.try_recv() {
        received.push(line_of(&event.kind).to_owned());
    }

    assert_eq!(received, ["6", "7", "8", "9"]);
    assert_eq!(slow.dropped(), 6);
    assert_eq!(fast.dropped(), 0);
}

#[tokio::test]
async fn per_session_order_is_preserved() {
    let bus = EventBus::new(64);
    let sink = sink_with_session(&bus, "web");
    let mut sub = bus.subscribe();

    for i in 0..20 {
        sink.emit("web", stdout(&format!("line {i}")));
    }

    for i in 0..20 {
        let event = sub.recv().await.expect("event");
        assert_eq!(event.session_id, "web");
        assert_eq!(line_of(&event.kind), format!("line {i}"));
    }
}

#[tokio::test]
async fn sink_drops_events_for_unregistered_sessions() {
    let bus = EventBus::new(8);
    let sink = sink_with_session(&bus, "web");
    let mut sub = bus.subscribe();

    assert!(!sink.emit("ghost", stdout("lost")));
    assert!(sub.try_recv().is_none());
}

#[test]
fn publish_without_subscribers_is_not_an_error() {
    let bus = EventBus::new(8);
    let sink = sink_with_session(&bus, "web");
    assert!(sink.emit("web", stdout("nobody listening")));

    let mut late = bus.subscribe();
    assert!(late.try_recv().is_none());
}
