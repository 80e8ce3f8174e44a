//! WebSocket transport for live operator sessions.
//!
//! Each connection becomes one relay session. Client frames map onto
//! [`RelayEvent`]s; relay errors are answered with an `error` frame on the
//! same connection. Frame formats live in `herald_shared::protocol`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use herald_shared::constants::SESSION_QUEUE_DEPTH;
use herald_shared::protocol::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::relay::{Relay, RelayEvent, SessionId};

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// Spawns a writer task draining the session outbox into the socket, and
/// reads client frames until the socket closes.
async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session: SessionId = Uuid::new_v4();

    let (outbox, mut rx) = mpsc::channel::<ServerFrame>(SESSION_QUEUE_DEPTH);
    if let Err(e) = relay
        .dispatch(RelayEvent::Connected {
            session,
            outbox: outbox.clone(),
        })
        .await
    {
        warn!(error = %e, "Failed to register session");
        return;
    }

    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                let event = match ClientFrame::decode(&text) {
                    Ok(frame) => to_event(session, frame),
                    Err(e) => {
                        debug!(session = %session, error = %e, "Invalid client frame");
                        reply_error(&outbox, e.to_string());
                        continue;
                    }
                };

                if let Err(e) = relay.dispatch(event).await {
                    reply_error(&outbox, e.to_string());
                }
            }
            Message::Close(_) => break,
            _ => {} // Ignore binary, ping (handled by tungstenite layer)
        }
    }

    // Cleanup.
    let _ = relay.dispatch(RelayEvent::Disconnected { session }).await;
    sender_task.abort();
}

fn to_event(session: SessionId, frame: ClientFrame) -> RelayEvent {
    match frame {
        ClientFrame::Join { id } => RelayEvent::JoinRoom {
            session,
            user_id: id,
        },
        ClientFrame::Leave { id } => RelayEvent::LeaveRoom {
            session,
            user_id: id,
        },
        ClientFrame::Send { id, message } => RelayEvent::OutboundSend {
            session,
            user_id: id,
            text: message,
        },
    }
}

fn reply_error(outbox: &mpsc::Sender<ServerFrame>, error: String) {
    if outbox.try_send(ServerFrame::Error { error }).is_err() {
        debug!("Dropping error frame for slow session");
    }
}
