//! Append-only message log.

use chrono::{DateTime, Utc};
use pinchat_shared::UserId;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, body, created_at, read";

/// Timestamp of the most recent append. `created_at` never decreases in id
/// order, so the highest rowid carries the maximum.
const NEWEST_CREATED_AT: &str = "SELECT created_at FROM messages ORDER BY id DESC LIMIT 1";

impl Database {
    /// Validate, timestamp and persist a new message, returning the stored
    /// record.
    ///
    /// The id comes from SQLite's AUTOINCREMENT and the timestamp is clamped
    /// to the newest existing one, both inside one transaction, so
    /// `created_at` never decreases in id order even if the wall clock steps
    /// backwards. Either the whole row is committed or nothing is.
    pub fn append_message(
        &mut self,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> Result<Message> {
        if sender_id == receiver_id {
            return Err(StoreError::InvalidArgument(
                "cannot send a message to yourself".into(),
            ));
        }
        if body.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "message body must not be empty".into(),
            ));
        }

        let tx = self.conn_mut().transaction()?;

        let newest: Option<i64> = tx
            .query_row(NEWEST_CREATED_AT, [], |row| row.get(0))
            .optional()?;
        let now_ms = Utc::now().timestamp_millis();
        let created_ms = newest.map_or(now_ms, |n| n.max(now_ms));
        // Dropping `tx` on this path rolls back; nothing has been written.
        let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms).ok_or_else(|| {
            StoreError::Unavailable(format!("stored timestamp out of range: {created_ms}"))
        })?;

        tx.execute(
            "INSERT INTO messages (sender_id, receiver_id, body, created_at, read)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                sender_id.to_string(),
                receiver_id.to_string(),
                body,
                created_ms
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(
            id,
            sender = %sender_id,
            receiver = %receiver_id,
            "message appended"
        );

        Ok(Message {
            id,
            sender_id,
            receiver_id,
            body: body.to_string(),
            created_at,
            read: false,
        })
    }

    /// Every message exchanged between `a` and `b`, in either direction,
    /// oldest first (ties broken by id).
    pub fn list_between(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Every message `user` sent or received, oldest first.
    pub fn list_for_user(&self, user: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: i64) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Acknowledge every unread message `reader` received from
    /// `counterpart`. Returns how many rows flipped from unread to read.
    pub fn mark_read(&self, reader: UserId, counterpart: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET read = 1
             WHERE receiver_id = ?1 AND sender_id = ?2 AND read = 0",
            params![reader.to_string(), counterpart.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_ms: i64 = row.get(4)?;
    let read: bool = row.get(5)?;

    let sender_id = Uuid::parse_str(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = Uuid::parse_str(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, created_ms))?;

    Ok(Message {
        id,
        sender_id: UserId(sender_id),
        receiver_id: UserId(receiver_id),
        body,
        created_at,
        read,
    })
}
