//! Session HTTP surface: capability discovery, bearer auth, session CRUD,
//! and the notification websocket.

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use super::test_helpers::{launch_test_host, test_config, TestHost, TEST_TOKEN, WAIT};

fn session_body(id: &str) -> Value {
    json!({"id": id, "kind": "executable", "command": "sh", "args": ["-c", "exit 0"]})
}

async fn put(test: &TestHost, body: String) -> reqwest::Response {
    reqwest::Client::new()
        .put(format!("{}/run_session/", test.http_base()))
        .bearer_auth(TEST_TOKEN)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("request sent")
}

#[tokio::test]
async fn info_is_public() {
    let test = launch_test_host(test_config(false)).await;

    let response = reqwest::get(format!("{}/info", test.http_base()))
        .await
        .expect("request sent");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["protocols_supported"], json!(["2024-03-03"]));
    assert_eq!(
        body["supported_session_types"],
        json!(["project", "executable", "container"])
    );
    assert_eq!(body["features"], json!([]));
}

#[tokio::test]
async fn missing_or_wrong_token_is_unauthorized() {
    let test = launch_test_host(test_config(false)).await;
    let client = reqwest::Client::new();

    let anonymous = client
        .put(format!("{}/run_session", test.http_base()))
        .body(session_body("web").to_string())
        .send()
        .await
        .expect("request sent");
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body: Value = anonymous.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "Unauthorized");

    let wrong = client
        .delete(format!("{}/run_session/web", test.http_base()))
        .bearer_auth("nope")
        .send()
        .await
        .expect("request sent");
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert!(!test.orchestrator.registry().contains(&test.host.id, "web"));
}

#[tokio::test]
async fn put_creates_then_replaces() {
    let test = launch_test_host(test_config(false)).await;

    let created = put(&test, session_body("web").to_string()).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(
        created
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok()),
        Some("/run_session/web")
    );
    let echoed: Value = created.json().await.expect("json body");
    assert_eq!(echoed["id"], "web");

    let replaced = put(&test, session_body("web").to_string()).await;
    assert_eq!(replaced.status(), StatusCode::OK);

    let sessions = test.orchestrator.sessions(&test.host.id).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].revision, 2);
}

#[tokio::test]
async fn put_without_id_generates_one() {
    let test = launch_test_host(test_config(false)).await;

    let response = put(
        &test,
        json!({"kind": "executable", "command": "sh"}).to_string(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_owned();
    let id = location.strip_prefix("/run_session/").expect("location prefix");
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert!(test.orchestrator.registry().contains(&test.host.id, id));
}

#[tokio::test]
async fn malformed_descriptor_is_bad_request() {
    let test = launch_test_host(test_config(false)).await;

    let response = put(&test, r#"{"kind": "spaceship"}"#.to_owned()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "ProtocolError");
    assert!(body["error"]["message"]
        .as_str()
        .expect("message")
        .contains("invalid session descriptor"));
}

#[tokio::test]
async fn delete_known_then_unknown() {
    let test = launch_test_host(test_config(false)).await;
    put(&test, session_body("web").to_string()).await;
    let client = reqwest::Client::new();
    let url = format!("{}/run_session/web", test.http_base());

    let first = client
        .delete(&url)
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .expect("request sent");
    assert_eq!(first.status(), StatusCode::OK);

    let second = client
        .delete(&url)
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .expect("request sent");
    assert_eq!(second.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn notify_without_upgrade_is_bad_request() {
    let test = launch_test_host(test_config(false)).await;

    let response = reqwest::Client::new()
        .get(format!("{}/run_session/notify", test.http_base()))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .expect("request sent");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[cfg(unix)]
#[tokio::test]
async fn notify_streams_session_records() {
    let test = launch_test_host(test_config(true)).await;

    let mut request = format!("ws://{}/run_session/notify", test.host.http_addr)
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {TEST_TOKEN}").parse().expect("header value"),
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("websocket upgrade");

    let created = put(
        &test,
        json!({"id": "echo", "kind": "executable", "command": "sh", "args": ["-c", "echo hi"]})
            .to_string(),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let record = tokio::time::timeout(WAIT, async {
        while let Some(message) = socket.next().await {
            if let Ok(Message::Text(text)) = message {
                let record: Value = serde_json::from_str(text.as_str()).expect("record json");
                if record["type"] == "stdout" {
                    return Some(record);
                }
            }
        }
        None
    })
    .await
    .expect("record in time")
    .expect("stdout record");

    assert_eq!(record["session_id"], "echo");
    assert_eq!(record["payload"]["text"], "hi");
    assert!(record["timestamp"].is_string());
}
