//! Identity directory: PIN <-> user lookups.

use chrono::{DateTime, Utc};
use pinchat_shared::{Pin, UserId};
use rusqlite::{params, ErrorCode};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Identity;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new identity.
    ///
    /// Uniqueness of `username` and `pin` is enforced by the table's UNIQUE
    /// constraints within the single INSERT, so two racing registrations can
    /// never both succeed.
    pub fn create_user(&self, username: &str, pin: &Pin) -> Result<Identity> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::InvalidArgument(
                "username must not be empty".into(),
            ));
        }

        let identity = Identity {
            id: UserId::new(),
            username: username.to_string(),
            pin: pin.clone(),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO users (id, username, pin, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    identity.id.to_string(),
                    identity.username,
                    identity.pin.as_str(),
                    identity.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict("username or PIN already exists".into())
                }
                other => StoreError::Sqlite(other),
            })?;

        tracing::info!(user = %identity.id, pin = %identity.pin, "identity created");
        Ok(identity)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Exact-match lookup on the PIN.
    pub fn find_user_by_pin(&self, pin: &Pin) -> Result<Identity> {
        self.conn()
            .query_row(
                "SELECT id, username, pin, created_at FROM users WHERE pin = ?1",
                params![pin.as_str()],
                row_to_identity,
            )
            .map_err(not_found)
    }

    pub fn find_user_by_id(&self, id: UserId) -> Result<Identity> {
        self.conn()
            .query_row(
                "SELECT id, username, pin, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_identity,
            )
            .map_err(not_found)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove an identity from the directory. Its messages stay in the log.
    /// Returns `true` if a row was deleted.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to an [`Identity`].
fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let pin_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let pin = Pin::parse(&pin_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Identity {
        id: UserId(id),
        username,
        pin,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(s: &str) -> Pin {
        Pin::parse(s).unwrap()
    }

    #[test]
    fn test_create_and_resolve() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", &pin("111")).unwrap();

        let by_pin = db.find_user_by_pin(&pin("111")).unwrap();
        assert_eq!(by_pin, alice);

        let by_id = db.find_user_by_id(alice.id).unwrap();
        assert_eq!(by_id.username, "alice");
    }

    #[test]
    fn test_unknown_pin_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", &pin("111")).unwrap();

        assert!(matches!(
            db.find_user_by_pin(&pin("999")),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.find_user_by_id(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_duplicate_pin_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", &pin("111")).unwrap();

        let err = db.create_user("bob", &pin("111")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", &pin("111")).unwrap();

        let err = db.create_user("alice", &pin("222")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // The rejected PIN is still free.
        assert!(db.create_user("bob", &pin("222")).is_ok());
    }

    #[test]
    fn test_blank_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.create_user("   ", &pin("111")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_delete_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", &pin("111")).unwrap();

        assert!(db.delete_user(alice.id).unwrap());
        assert!(!db.delete_user(alice.id).unwrap());
        assert!(matches!(
            db.find_user_by_pin(&pin("111")),
            Err(StoreError::NotFound)
        ));
    }
}
