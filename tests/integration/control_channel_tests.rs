//! Control channel handshake, request acknowledgement, and disconnect
//! teardown over a real TCP connection.

use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::test_helpers::{launch_test_host, test_config, wait_until, TEST_TOKEN, WAIT};

struct ControlClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl ControlClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect control channel");
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.send_bytes(format!("{line}\n").as_bytes()).await;
    }

    async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write bytes");
    }

    async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("reply in time")
            .expect("read reply")?;
        Some(serde_json::from_str(&line).expect("reply is json"))
    }

    async fn handshake(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(json!({"type": "hello", "token": TEST_TOKEN, "protocol_version": 1}))
            .await;
        let welcome = client.recv().await.expect("welcome");
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["protocol_version"], 1);
        client
    }
}

fn announce(seq: u64, id: &str) -> Value {
    json!({
        "type": "announce_session",
        "seq": seq,
        "session": {"id": id, "kind": "executable", "command": "sh", "args": ["-c", "exit 0"]}
    })
}

#[tokio::test]
async fn bad_token_is_rejected_and_closed() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::connect(test.control_addr()).await;

    client.send(json!({"type": "hello", "token": "wrong"})).await;

    let reply = client.recv().await.expect("rejection");
    assert_eq!(reply["type"], "rejected");
    assert!(reply["reason"].as_str().expect("reason").contains("invalid token"));
    assert!(client.recv().await.is_none());

    assert!(test.orchestrator.host(&test.host.id).is_some());
}

#[tokio::test]
async fn unsupported_protocol_version_is_rejected() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::connect(test.control_addr()).await;

    client
        .send(json!({"type": "hello", "token": TEST_TOKEN, "protocol_version": 99}))
        .await;

    let reply = client.recv().await.expect("rejection");
    assert_eq!(reply["type"], "rejected");
}

#[tokio::test]
async fn rejected_client_can_retry() {
    let test = launch_test_host(test_config(false)).await;

    let mut bad = ControlClient::connect(test.control_addr()).await;
    bad.send(json!({"type": "hello", "token": "wrong"})).await;
    assert_eq!(bad.recv().await.expect("rejection")["type"], "rejected");

    let _good = ControlClient::handshake(test.control_addr()).await;
    assert!(
        wait_until(|| test
            .orchestrator
            .host(&test.host.id)
            .is_some_and(|h| h.connected))
        .await
    );
}

#[tokio::test]
async fn announce_is_acknowledged() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    client.send(announce(1, "job")).await;

    let reply = client.recv().await.expect("ack");
    assert_eq!(reply, json!({"type": "ack", "seq": 1}));
    assert!(test.orchestrator.registry().contains(&test.host.id, "job"));
}

#[tokio::test]
async fn replies_follow_request_order() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    for seq in 1..=5 {
        client.send(announce(seq, &format!("job-{seq}"))).await;
    }
    client
        .send(json!({"type": "delete_session", "seq": 6, "id": "job-2"}))
        .await;

    for seq in 1..=6 {
        let reply = client.recv().await.expect("reply");
        assert_eq!(reply["type"], "ack");
        assert_eq!(reply["seq"], seq);
    }
    assert_eq!(test.orchestrator.sessions(&test.host.id).expect("sessions").len(), 4);
}

#[tokio::test]
async fn malformed_request_with_seq_is_nacked() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    client.send(json!({"type": "announce_session", "seq": 5})).await;

    let reply = client.recv().await.expect("nack");
    assert_eq!(reply["type"], "nack");
    assert_eq!(reply["seq"], 5);
    assert_eq!(reply["error"]["code"], "ProtocolError");
}

#[tokio::test]
async fn garbage_without_seq_is_skipped() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    client.send_raw("this is not json").await;
    client.send(announce(2, "job")).await;

    let reply = client.recv().await.expect("reply to the valid request");
    assert_eq!(reply, json!({"type": "ack", "seq": 2}));
}

#[tokio::test]
async fn non_utf8_line_is_skipped_and_host_survives() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    client.send_bytes(b"\xff\xfe not json \xc3\n").await;
    client.send(announce(2, "job")).await;

    let reply = client.recv().await.expect("reply to the valid request");
    assert_eq!(reply, json!({"type": "ack", "seq": 2}));
    assert!(test.orchestrator.host(&test.host.id).is_some());
    assert_eq!(test.orchestrator.sessions(&test.host.id).expect("sessions").len(), 1);
}

#[tokio::test]
async fn non_utf8_inside_request_is_decoded_lossily() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    let mut line = br#"{"type":"announce_session","seq":7,"session":{"id":"caf"#.to_vec();
    line.push(0xe9);
    line.extend_from_slice(br#"","kind":"executable","command":"sh"}}"#);
    line.push(b'\n');
    client.send_bytes(&line).await;

    let reply = client.recv().await.expect("ack");
    assert_eq!(reply, json!({"type": "ack", "seq": 7}));
    let sessions = test.orchestrator.sessions(&test.host.id).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id(), "caf\u{FFFD}");
}

#[tokio::test]
async fn update_of_unknown_session_is_nacked() {
    let test = launch_test_host(test_config(false)).await;
    let mut client = ControlClient::handshake(test.control_addr()).await;

    client
        .send(json!({
            "type": "update_session",
            "seq": 3,
            "id": "ghost",
            "session": {"kind": "executable", "command": "sh"}
        }))
        .await;

    let reply = client.recv().await.expect("nack");
    assert_eq!(reply["type"], "nack");
    assert_eq!(reply["seq"], 3);
    assert_eq!(reply["error"]["code"], "NotFound");
}

#[cfg(unix)]
#[tokio::test]
async fn disconnect_tears_host_down() {
    use devhost_orchestrator::models::event::{EventKind, ExitReason};
    use devhost_orchestrator::models::session::SessionState;

    use super::test_helpers::{wait_for_event, wait_for_state};

    let test = launch_test_host(test_config(true)).await;
    let mut events = test.orchestrator.subscribe();
    let mut client = ControlClient::handshake(test.control_addr()).await;

    client
        .send(json!({
            "type": "announce_session",
            "seq": 1,
            "session": {"id": "web", "kind": "executable", "command": "sh", "args": ["-c", "exec sleep 30"]}
        }))
        .await;
    assert_eq!(client.recv().await.expect("ack")["type"], "ack");
    assert!(wait_for_state(&test, "web", SessionState::Running).await);

    drop(client);

    wait_for_event(&mut events, "web", |kind| {
        matches!(kind, EventKind::Exited { reason: ExitReason::KilledByOrchestrator, .. })
    })
    .await
    .expect("running session stopped on disconnect");
    assert!(wait_until(|| !test.orchestrator.registry().has_host(&test.host.id)).await);
    assert!(test.orchestrator.host(&test.host.id).is_none());
}
