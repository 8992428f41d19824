//! WebSocket transport: one session per socket.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use coderelay_core::OutboundMessage;
use coderelay_session::{Session, SessionConfig};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::http::AppState;

/// Time the writer gets to flush queued messages after the session closes.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.config))
}

async fn handle_socket(socket: WebSocket, config: Arc<SessionConfig>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(config, tx);
    tracing::info!(session = %session.id(), "Client connected");

    // Requests are handled strictly in arrival order
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => session.handle_text(text).await,
                Err(e) => tracing::warn!(session = %session.id(), "Dropping non-UTF-8 frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session = %session.id(), "WebSocket error: {e}");
                break;
            }
        }
    }

    let id = session.id();
    session.close().await;

    // Every sender is gone now, so the writer ends once the queue is empty.
    let abort = send_task.abort_handle();
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, send_task)
        .await
        .is_err()
    {
        abort.abort();
    }
    tracing::info!(session = %id, "Client disconnected");
}
