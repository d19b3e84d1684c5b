//! v001 -- Initial schema creation.
//!
//! Creates the `users` directory and the append-only `messages` log.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (identity directory)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,         -- UUID v4
    username   TEXT NOT NULL UNIQUE,
    pin        TEXT NOT NULL UNIQUE
               CHECK (length(pin) = 3 AND pin NOT GLOB '*[^0-9]*'),
    created_at TEXT NOT NULL                      -- RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- No foreign keys to users: a message outlives its participants'
-- directory entries.
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   TEXT NOT NULL,                    -- UUID v4
    receiver_id TEXT NOT NULL,                    -- UUID v4
    body        TEXT NOT NULL CHECK (length(body) > 0),
    created_at  INTEGER NOT NULL,                 -- unix millis
    read        INTEGER NOT NULL DEFAULT 0,       -- boolean 0/1

    CHECK (sender_id <> receiver_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_id, receiver_id, created_at, id);

CREATE INDEX IF NOT EXISTS idx_messages_receiver
    ON messages(receiver_id, created_at, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
