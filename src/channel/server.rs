//! Control channel listener and per-connection dispatch loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::LineCodec;
use super::protocol::{
    parse_host_line, salvage_seq, ErrorBody, HostMessage, OrchestratorMessage, PROTOCOL_VERSION,
};
use super::HostCommands;
use crate::{AppError, Result};

type LineReader = FramedRead<OwnedReadHalf, LineCodec>;

/// Bind a control channel listener.
///
/// # Errors
///
/// Returns `AppError::Channel` if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Channel(format!("failed to bind control channel on {addr}: {err}")))
}

/// Spawn the control channel task for one host.
///
/// Connections that fail the handshake are closed and the listener keeps
/// waiting. The first authenticated connection is served until it ends,
/// after which the listener is dropped and [`HostCommands::disconnected`]
/// is called. Cancelling `cancel` stops the task without that callback.
#[must_use]
pub fn spawn_control_channel(
    listener: TcpListener,
    commands: Arc<dyn HostCommands>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = info_span!("control_channel", host = %commands.host());
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("control channel shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(%err, "control channel accept failed");
                                continue;
                            }
                        };
                        let (read_half, mut writer) = stream.into_split();
                        let mut lines = FramedRead::new(read_half, LineCodec::new());

                        if let Err(err) = handshake(
                            &mut lines,
                            &mut writer,
                            commands.token(),
                            handshake_timeout,
                        )
                        .await
                        {
                            warn!(%peer, %err, "control handshake failed");
                            reject(&mut writer, &err).await;
                            continue;
                        }

                        info!(%peer, "host connected");
                        commands.connected();
                        let ended = serve_connection(lines, writer, commands.as_ref(), &cancel)
                            .instrument(info_span!("control_connection", %peer))
                            .await;
                        if let Some(reason) = ended {
                            info!(%peer, %reason, "host disconnected");
                            commands.disconnected(&reason);
                        }
                        break;
                    }
                }
            }
        }
        .instrument(span),
    )
}

/// Read the first message and check it is a valid `hello`.
async fn handshake(
    lines: &mut LineReader,
    writer: &mut OwnedWriteHalf,
    expected_token: &str,
    timeout: Duration,
) -> Result<()> {
    let first = tokio::time::timeout(timeout, next_message(lines))
        .await
        .map_err(|_| AppError::Unauthorized(format!("no hello within {timeout:?}")))??;

    match first {
        Some(HostMessage::Hello {
            token,
            protocol_version,
        }) => {
            if token != expected_token {
                return Err(AppError::Unauthorized("invalid token".into()));
            }
            if protocol_version == 0 || protocol_version > PROTOCOL_VERSION {
                return Err(AppError::Protocol(format!(
                    "unsupported protocol version {protocol_version}"
                )));
            }
            let welcome = OrchestratorMessage::Welcome {
                protocol_version: PROTOCOL_VERSION,
            };
            write_message(writer, &welcome).await
        }
        Some(_) => Err(AppError::Protocol("expected hello as the first message".into())),
        None => Err(AppError::Channel("connection closed before hello".into())),
    }
}

/// Next non-blank message; `None` at end of stream.
async fn next_message(lines: &mut LineReader) -> Result<Option<HostMessage>> {
    while let Some(line) = lines.next().await {
        if let Some(message) = parse_host_line(&line?)? {
            return Ok(Some(message));
        }
    }
    Ok(None)
}

async fn reject(writer: &mut OwnedWriteHalf, err: &AppError) {
    let rejected = OrchestratorMessage::Rejected {
        reason: err.to_string(),
    };
    if let Err(write_err) = write_message(writer, &rejected).await {
        debug!(%write_err, "could not deliver rejection");
    }
    let _ = writer.shutdown().await;
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &OrchestratorMessage) -> Result<()> {
    let line = message.to_line()?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|err| AppError::Channel(format!("write failed: {err}")))
}

/// Serve requests in arrival order. Returns the disconnect reason, or `None`
/// when the host lifetime was cancelled.
async fn serve_connection(
    mut lines: LineReader,
    mut writer: OwnedWriteHalf,
    commands: &dyn HostCommands,
    cancel: &CancellationToken,
) -> Option<String> {
    // FramedRead yields a single `None` after a decode error, then resumes.
    let mut after_error = false;
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            item = lines.next() => item,
        };

        match item {
            Some(Ok(line)) => {
                after_error = false;
                if let Some(reply) = dispatch_line(&line, commands).await {
                    if let Err(err) = write_message(&mut writer, &reply).await {
                        return Some(err.to_string());
                    }
                }
            }
            Some(Err(AppError::Protocol(msg))) => {
                warn!(%msg, "skipping oversized control line");
                after_error = true;
            }
            Some(Err(err)) => return Some(format!("read failed: {err}")),
            None if after_error => after_error = false,
            None => return Some("connection closed".into()),
        }
    }
}

/// Apply one request line and build its reply.
async fn dispatch_line(line: &str, commands: &dyn HostCommands) -> Option<OrchestratorMessage> {
    let message = match parse_host_line(line) {
        Ok(Some(message)) => message,
        Ok(None) => return None,
        Err(err) => {
            warn!(%err, "malformed control message");
            return salvage_seq(line).map(|seq| OrchestratorMessage::Nack {
                seq,
                error: ErrorBody::from(&err),
            });
        }
    };

    let (seq, result) = match message {
        HostMessage::Hello { .. } => {
            warn!("ignoring repeated hello");
            return None;
        }
        HostMessage::AnnounceSession { seq, session } => {
            debug!(seq, session_id = %session.id, "announce_session");
            (seq, commands.announce(session).await.map(|_| ()))
        }
        HostMessage::UpdateSession { seq, id, session } => {
            debug!(seq, session_id = %id, "update_session");
            (seq, commands.update(id, session).await)
        }
        HostMessage::DeleteSession { seq, id } => {
            debug!(seq, session_id = %id, "delete_session");
            (seq, commands.delete(id).await.map(|_| ()))
        }
    };

    Some(match result {
        Ok(()) => OrchestratorMessage::Ack { seq },
        Err(err) => {
            warn!(seq, %err, "control request refused");
            OrchestratorMessage::Nack {
                seq,
                error: ErrorBody::from(&err),
            }
        }
    })
}
