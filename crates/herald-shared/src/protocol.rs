//! JSON frames exchanged with live operator sessions over the relay socket.
//!
//! Client -> server:
//! ```json
//! {"event": "join", "id": "<user id>"}
//! {"event": "leave", "id": "<user id>"}
//! {"event": "send", "id": "<user id>", "message": "hello"}
//! ```
//!
//! Server -> client:
//! ```json
//! {"event": "new", "id": "<user id>", "roomId": "<user id>", "message": "hello",
//!  "variant": "OUTGOING", ...}
//! {"event": "error", "error": "User not found"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Direction, MessageId, UserId};

/// Frames sent by an operator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Bind the session to a user's room.
    Join { id: UserId },
    /// Unbind the session from a user's room.
    Leave { id: UserId },
    /// Send a message to a user.
    Send { id: UserId, message: String },
}

impl ClientFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Self = serde_json::from_str(text)?;
        if let Self::Send { message, .. } = &frame {
            if message.trim().is_empty() {
                return Err(ProtocolError::Invalid("message must not be empty".into()));
            }
        }
        Ok(frame)
    }
}

/// A conversation message as emitted to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    /// The user the conversation belongs to.
    pub id: UserId,
    /// Room the frame was emitted in; always equal to `id`.
    pub room_id: UserId,
    pub message_id: MessageId,
    pub message: String,
    pub variant: Direction,
    pub created_at: DateTime<Utc>,
}

/// Frames pushed to operator sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerFrame {
    New(RoomMessage),
    Error { error: String },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
