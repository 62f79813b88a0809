//! WebSocket transport for [`run_session`].

use super::protocol::{ClientMessage, InputError, ServerMessage};
use super::{Inbound, SessionDeps, SessionReport, run_session};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

const INBOUND_CAPACITY: usize = 32;
const OUTBOUND_CAPACITY: usize = 64;
/// Prefix of the transport error raised when a frame or message exceeds its size limit.
const SIZE_LIMIT_ERROR: &str = "Space limit exceeded";

/// Bridge an upgraded socket to a session and run it to completion.
///
/// Frames are parsed by a reader task and written by a writer task; the socket is closed once
/// the session has sent its last message.
pub async fn serve_socket(socket: WebSocket, deps: SessionDeps) -> SessionReport {
    let limit = deps.settings.max_upload_bytes;
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(error = %error, "Failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                tracing::debug!("Socket write failed; client is gone");
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let inbound = match frame {
                Ok(Message::Text(text)) => parse_frame(&text),
                Ok(Message::Binary(_)) => Inbound::Invalid(InputError::Binary),
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => break,
                Err(error) => {
                    tracing::debug!(error = %error, "Socket read failed");
                    if let Some(inbound) = read_failure(&error, limit) {
                        let _ = inbound_tx.send(inbound).await;
                    }
                    break;
                }
            };
            if inbound_tx.send(inbound).await.is_err() {
                return;
            }
        }
        let _ = inbound_tx.send(Inbound::Closed).await;
    });

    let report = run_session(deps, inbound_rx, outbound_tx).await;
    reader.abort();
    if let Err(error) = writer.await {
        tracing::warn!(error = %error, "Socket writer ended abnormally");
    }
    report
}

fn parse_frame(text: &str) -> Inbound {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => Inbound::Message(message),
        Err(error) => Inbound::Invalid(InputError::Malformed(error.to_string())),
    }
}

/// Map a transport read error that the client should hear about to session input.
fn read_failure(error: &axum::Error, limit: usize) -> Option<Inbound> {
    error
        .to_string()
        .starts_with(SIZE_LIMIT_ERROR)
        .then_some(Inbound::Invalid(InputError::TooLarge { limit }))
}
