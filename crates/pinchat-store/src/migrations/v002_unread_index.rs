use rusqlite::Connection;

// Partial index backing unread counts and read acknowledgments.
const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(receiver_id, sender_id)
    WHERE read = 0;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
