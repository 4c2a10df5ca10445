//! Session environment assembly.
//!
//! Every launched process receives the host's collaborator endpoints so it
//! can report telemetry and resource state back. Values the host declared on
//! the descriptor take precedence over the injected ones.

use std::collections::BTreeMap;

use crate::models::host::{
    HostEndpoint, DEBUG_SESSION_TOKEN, DOTNET_RESOURCE_SERVICE_ENDPOINT_URL,
};

/// OTLP exporter endpoint variable read by instrumented workloads.
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Session identifier exported to every launched process.
pub const DEVHOST_SESSION_ID: &str = "DEVHOST_SESSION_ID";

/// Variables the orchestrator injects for `session_id` on this host.
#[must_use]
pub fn injected_variables(endpoint: &HostEndpoint, session_id: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert(DEBUG_SESSION_TOKEN.to_owned(), endpoint.token.clone());
    vars.insert(DEVHOST_SESSION_ID.to_owned(), session_id.to_owned());
    if let Some(url) = &endpoint.otlp_endpoint_url {
        vars.insert(OTEL_EXPORTER_OTLP_ENDPOINT.to_owned(), url.to_string());
    }
    if let Some(url) = &endpoint.resource_service_url {
        vars.insert(
            DOTNET_RESOURCE_SERVICE_ENDPOINT_URL.to_owned(),
            url.to_string(),
        );
    }
    vars
}

/// Overlay `declared` on top of `injected`; declared keys win.
#[must_use]
pub fn merge(
    injected: BTreeMap<String, String>,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = injected;
    for (key, value) in declared {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Full environment for a session process.
#[must_use]
pub fn session_environment(
    endpoint: &HostEndpoint,
    session_id: &str,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    merge(injected_variables(endpoint, session_id), declared)
}
