use std::collections::HashMap;

use devhost_orchestrator::models::host::{
    HostEndpoint, HostId, DEBUG_SESSION_PORT, DEBUG_SESSION_TOKEN,
    DOTNET_ASPIRE_CONTAINER_RUNTIME, DOTNET_DASHBOARD_OTLP_ENDPOINT_URL,
    DOTNET_RESOURCE_SERVICE_ENDPOINT_URL,
};
use devhost_orchestrator::AppError;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn parses_required_and_optional_values() {
    let endpoint = HostEndpoint::from_environment(&env(&[
        (DEBUG_SESSION_TOKEN, "secret"),
        (DEBUG_SESSION_PORT, "localhost:5123"),
        (DOTNET_RESOURCE_SERVICE_ENDPOINT_URL, "https://localhost:7001"),
        (DOTNET_DASHBOARD_OTLP_ENDPOINT_URL, "http://localhost:4317"),
        (DOTNET_ASPIRE_CONTAINER_RUNTIME, "podman"),
    ]))
    .expect("endpoint parses");

    assert_eq!(endpoint.token, "secret");
    assert_eq!(endpoint.session_port, 5123);
    assert_eq!(
        endpoint.resource_service_url.as_ref().map(url::Url::as_str),
        Some("https://localhost:7001/")
    );
    assert_eq!(
        endpoint.otlp_endpoint_url.as_ref().map(url::Url::as_str),
        Some("http://localhost:4317/")
    );
    assert_eq!(endpoint.container_runtime.as_deref(), Some("podman"));
}

#[test]
fn optional_values_may_be_absent() {
    let endpoint = HostEndpoint::from_environment(&env(&[
        (DEBUG_SESSION_TOKEN, "secret"),
        (DEBUG_SESSION_PORT, "5123"),
    ]))
    .expect("endpoint parses");

    assert!(endpoint.resource_service_url.is_none());
    assert!(endpoint.otlp_endpoint_url.is_none());
    assert!(endpoint.container_runtime.is_none());
}

#[test]
fn missing_token_is_config_error() {
    let err = HostEndpoint::from_environment(&env(&[(DEBUG_SESSION_PORT, "5123")]))
        .expect_err("token is required");
    assert!(matches!(err, AppError::Config(msg) if msg.contains(DEBUG_SESSION_TOKEN)));
}

#[test]
fn blank_token_is_config_error() {
    let err = HostEndpoint::from_environment(&env(&[
        (DEBUG_SESSION_TOKEN, "  "),
        (DEBUG_SESSION_PORT, "5123"),
    ]))
    .expect_err("blank token is rejected");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn missing_port_is_config_error() {
    let err = HostEndpoint::from_environment(&env(&[(DEBUG_SESSION_TOKEN, "secret")]))
        .expect_err("port is required");
    assert!(matches!(err, AppError::Config(msg) if msg.contains(DEBUG_SESSION_PORT)));
}

#[test]
fn invalid_optional_url_is_config_error() {
    let err = HostEndpoint::from_environment(&env(&[
        (DEBUG_SESSION_TOKEN, "secret"),
        (DEBUG_SESSION_PORT, "5123"),
        (DOTNET_DASHBOARD_OTLP_ENDPOINT_URL, "not a url"),
    ]))
    .expect_err("malformed url is rejected");
    assert!(
        matches!(err, AppError::Config(msg) if msg.contains(DOTNET_DASHBOARD_OTLP_ENDPOINT_URL))
    );
}

#[test]
fn host_id_is_absolute() {
    let id = HostId::new("apps/Shop.AppHost.csproj").expect("relative path resolves");
    assert!(id.path().is_absolute());
    assert!(id.path().ends_with("apps/Shop.AppHost.csproj"));
}

#[test]
fn host_id_rejects_empty_path() {
    let err = HostId::new("").expect_err("empty path is rejected");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn token_is_not_serialized() {
    let endpoint = HostEndpoint::from_environment(&env(&[
        (DEBUG_SESSION_TOKEN, "secret"),
        (DEBUG_SESSION_PORT, "5123"),
    ]))
    .expect("endpoint parses");
    let json = serde_json::to_string(&endpoint).expect("serializes");
    assert!(!json.contains("secret"));
}
