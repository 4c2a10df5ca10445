//! Notification websocket: streams this host's session events as JSON
//! records, one per text frame.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ApiError, HttpState};
use crate::events::EventSubscription;
use crate::models::host::HostId;
use crate::AppError;

/// `GET /run_session/notify`. Non-upgrade requests get 400.
pub async fn notify(
    State(state): State<HttpState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            return ApiError::from(AppError::Protocol(format!(
                "notification socket requires a websocket upgrade: {rejection}"
            )))
            .into_response();
        }
    };

    // Subscribed before the upgrade completes.
    let subscription = state.commands.subscribe();
    let host = state.commands.host().clone();
    let cancel = state.cancel.clone();
    ws.on_upgrade(move |socket| stream_events(socket, subscription, host, cancel))
}

async fn stream_events(
    socket: WebSocket,
    mut subscription: EventSubscription,
    host: HostId,
    cancel: CancellationToken,
) {
    info!(host = %host, "notification listener attached");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => match incoming {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if event.host != host {
                    continue;
                }
                let text = match serde_json::to_string(&event.to_record()) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "failed to encode notification record");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(host = %host, dropped = subscription.dropped(), "notification listener detached");
}
