//! Per-host session HTTP surface.
//!
//! Bound to the host's `DEBUG_SESSION_PORT`. Mirrors the control channel for
//! hosts that speak HTTP, and carries the notification websocket.

pub mod notify;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::channel::HostCommands;
use crate::{AppError, Result};

pub use routes::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct HttpState {
    /// Operations of the owning host.
    pub commands: Arc<dyn HostCommands>,
    /// Host lifetime; open notification sockets close when it fires.
    pub cancel: CancellationToken,
}

/// Build the router. `/info` is public; every other route requires the
/// host's bearer token.
pub fn router(state: HttpState) -> Router {
    let protected = Router::new()
        .route("/run_session", put(routes::put_session))
        .route("/run_session/", put(routes::put_session))
        .route("/run_session/notify", get(notify::notify))
        .route("/run_session/{id}", delete(routes::delete_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/info", get(routes::info))
        .merge(protected)
        .with_state(state)
}

async fn require_token(State(state): State<HttpState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented != Some(state.commands.token()) {
        warn!(path = %request.uri().path(), "rejecting request without a valid bearer token");
        return ApiError::from(AppError::Unauthorized(
            "missing or invalid bearer token".into(),
        ))
        .into_response();
    }
    next.run(request).await
}

/// Bind the HTTP listener.
///
/// # Errors
///
/// Returns `AppError::Config` if the port is unavailable.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind session http surface on {addr}: {err}")))
}

/// Serve the surface until `cancel` fires.
#[must_use]
pub fn spawn_http_surface(
    listener: TcpListener,
    commands: Arc<dyn HostCommands>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = info_span!("http_surface", host = %commands.host());
    let app = router(HttpState {
        commands,
        cancel: cancel.clone(),
    });

    tokio::spawn(
        async move {
            match listener.local_addr() {
                Ok(addr) => info!(%addr, "session http surface listening"),
                Err(err) => warn!(%err, "session http surface address unknown"),
            }
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                warn!(%err, "session http surface failed");
            }
            info!("session http surface shut down");
        }
        .instrument(span),
    )
}
