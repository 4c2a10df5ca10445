//! Session CRUD and capability routes.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::HttpState;
use crate::channel::protocol::ErrorBody;
use crate::models::session::{SessionDescriptor, SessionKind};
use crate::orchestrator::registry::AddOutcome;
use crate::AppError;

/// Protocol revision advertised by `/info`.
pub const SESSION_PROTOCOL_VERSION: &str = "2024-03-03";

/// `GET /info` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoResponse {
    /// Supported protocol revisions.
    pub protocols_supported: Vec<String>,
    /// Session kinds this orchestrator can launch.
    pub supported_session_types: Vec<String>,
    /// Optional features; empty by default.
    pub features: Vec<String>,
}

impl Default for InfoResponse {
    fn default() -> Self {
        Self {
            protocols_supported: vec![SESSION_PROTOCOL_VERSION.to_owned()],
            supported_session_types: SessionKind::ALL
                .iter()
                .map(|kind| kind.as_str().to_owned())
                .collect(),
            features: Vec::new(),
        }
    }
}

/// Error body wrapper: `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    /// Failure details.
    pub error: ErrorBody,
}

/// Error response with its status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match err {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            body: ErrorBody::from(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorEnvelope { error: self.body })).into_response()
    }
}

/// `GET /info`.
pub async fn info() -> Json<InfoResponse> {
    Json(InfoResponse::default())
}

/// `PUT /run_session/`: create or replace a session.
///
/// A missing id is generated. Responds 201 for a new session and 200 when
/// an existing one was replaced, both with a `Location` header.
pub async fn put_session(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut descriptor: SessionDescriptor = serde_json::from_slice(&body).map_err(|err| {
        AppError::Protocol(format!("invalid session descriptor: {err}"))
    })?;
    if descriptor.id.trim().is_empty() {
        descriptor.id = Uuid::new_v4().to_string();
    }

    let location = format!("/run_session/{}", descriptor.id);
    let status = match state.commands.announce(descriptor.clone()).await? {
        AddOutcome::Created => StatusCode::CREATED,
        AddOutcome::Replaced => StatusCode::OK,
    };
    Ok((status, [(header::LOCATION, location)], Json(descriptor)).into_response())
}

/// `DELETE /run_session/{id}`: 200 if removed, 204 if unknown.
pub async fn delete_session(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.commands.delete(id).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}
