//! Domain model structs persisted in (or derived from) the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the API
//! layer; field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use pinchat_shared::{Pin, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A registered user as seen by the directory. Read-only for the messaging
/// core once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    /// Display name, unique across all identities.
    pub username: String,
    /// Public address, unique across all identities.
    pub pin: Pin,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single direct message.
///
/// Everything except `read` is immutable once the row exists. `id` is
/// assigned by SQLite and grows with insertion order; `created_at` never
/// decreases in `id` order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    /// The participant that is not `user`, or `None` if `user` took no part.
    pub fn counterpart_of(&self, user: UserId) -> Option<UserId> {
        if self.sender_id == user {
            Some(self.receiver_id)
        } else if self.receiver_id == user {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// Total order used by every listing: `created_at`, then `id`.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}

// ---------------------------------------------------------------------------
// Conversation summary (derived, never stored)
// ---------------------------------------------------------------------------

/// One row of a user's conversation list.
///
/// `counterpart_pin` and `counterpart_username` are `None` when the
/// counterpart no longer exists in the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub counterpart_id: UserId,
    pub counterpart_pin: Option<Pin>,
    pub counterpart_username: Option<String>,
    pub last_message_body: String,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u64,
    pub unread_count: u64,
}
