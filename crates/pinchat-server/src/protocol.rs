//! Live-connection wire protocol: JSON text frames tagged by `event`.

use pinchat_shared::UserId;
use pinchat_store::Message;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, ErrorKind};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        receiver_pin: String,
        message: String,
    },
}

/// Frames the server pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: UserId },
    /// A persisted message, delivered to both participants.
    NewMessage { message: Message },
    AuthError { reason: String },
    MessageError { kind: ErrorKind, reason: String },
}

impl ServerEvent {
    pub fn send_failed(err: &DeliveryError) -> Self {
        ServerEvent::MessageError {
            kind: err.kind(),
            reason: err.public_message(),
        }
    }
}
