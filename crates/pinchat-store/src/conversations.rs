//! Per-counterpart conversation rollup, recomputed from the message log on
//! every call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pinchat_shared::{Pin, UserId};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{ConversationSummary, Message};

/// Directory fields of one counterpart; both `None` once the identity has
/// left the directory.
type DirectoryEntry = (Option<Pin>, Option<String>);

/// Aggregate of one counterpart's messages before directory enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRollup {
    pub counterpart_id: UserId,
    pub last_message_id: i64,
    pub last_message_body: String,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u64,
    pub unread_count: u64,
}

/// Group `messages` by the participant that is not `user` and roll each
/// group up.
///
/// The last message of a group is the one with the greatest
/// `(created_at, id)`. Unread counts only include messages `user` received.
/// Messages that do not involve `user` are ignored. The result is ordered
/// most recently active first.
pub fn rollup(user: UserId, messages: &[Message]) -> Vec<ConversationRollup> {
    let mut groups: HashMap<UserId, ConversationRollup> = HashMap::new();

    for message in messages {
        let Some(counterpart) = message.counterpart_of(user) else {
            continue;
        };
        let unread = u64::from(message.receiver_id == user && !message.read);

        groups
            .entry(counterpart)
            .and_modify(|group| {
                group.message_count += 1;
                group.unread_count += unread;
                if message.order_key() > (group.last_message_at, group.last_message_id) {
                    group.last_message_id = message.id;
                    group.last_message_body.clone_from(&message.body);
                    group.last_message_at = message.created_at;
                }
            })
            .or_insert_with(|| ConversationRollup {
                counterpart_id: counterpart,
                last_message_id: message.id,
                last_message_body: message.body.clone(),
                last_message_at: message.created_at,
                message_count: 1,
                unread_count: unread,
            });
    }

    let mut rollups: Vec<_> = groups.into_values().collect();
    rollups.sort_by(|a, b| {
        (b.last_message_at, b.last_message_id).cmp(&(a.last_message_at, a.last_message_id))
    });
    rollups
}

impl Database {
    /// One summary per counterpart `user` has ever exchanged a message with,
    /// most recently active first.
    ///
    /// A counterpart that has since left the directory keeps its entry, with
    /// `counterpart_pin` and `counterpart_username` left empty.
    pub fn summarize(&self, user: UserId) -> Result<Vec<ConversationSummary>> {
        // Both reads come from one snapshot, so every counterpart in the log
        // is also in the directory lookup.
        let snapshot = self.conn().unchecked_transaction()?;
        let messages = self.list_for_user(user)?;
        let mut directory = self.counterpart_directory(user)?;
        snapshot.commit()?;

        let rollups = rollup(user, &messages);
        let mut summaries = Vec::with_capacity(rollups.len());
        for r in rollups {
            let (counterpart_pin, counterpart_username) =
                directory.remove(&r.counterpart_id).unwrap_or_default();
            if counterpart_pin.is_none() {
                tracing::debug!(
                    user = %user,
                    counterpart = %r.counterpart_id,
                    "counterpart missing from directory"
                );
            }

            summaries.push(ConversationSummary {
                counterpart_id: r.counterpart_id,
                counterpart_pin,
                counterpart_username,
                last_message_body: r.last_message_body,
                last_message_at: r.last_message_at,
                message_count: r.message_count,
                unread_count: r.unread_count,
            });
        }
        Ok(summaries)
    }

    /// Directory entries for every counterpart `user` has exchanged a
    /// message with, in one query.
    fn counterpart_directory(&self, user: UserId) -> Result<HashMap<UserId, DirectoryEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.counterpart, u.pin, u.username
             FROM (SELECT DISTINCT
                          CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                              AS counterpart
                   FROM messages
                   WHERE sender_id = ?1 OR receiver_id = ?1) AS c
             LEFT JOIN users u ON u.id = c.counterpart",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let pin_str: Option<String> = row.get(1)?;
            let username: Option<String> = row.get(2)?;

            let id = Uuid::parse_str(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            let pin = pin_str
                .map(|p| Pin::parse(&p))
                .transpose()
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;

            Ok((UserId(id), (pin, username)))
        })?;

        let mut directory = HashMap::new();
        for row in rows {
            let (id, entry) = row?;
            directory.insert(id, entry);
        }
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pinchat_shared::Pin;

    fn msg(id: i64, from: UserId, to: UserId, at_ms: i64, read: bool) -> Message {
        Message {
            id,
            sender_id: from,
            receiver_id: to,
            body: format!("m{id}"),
            created_at: Utc.timestamp_millis_opt(at_ms).unwrap(),
            read,
        }
    }

    #[test]
    fn test_rollup_groups_by_counterpart() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let log = vec![
            msg(1, a, b, 1_000, false),
            msg(2, b, a, 2_000, false),
            msg(3, a, c, 3_000, false),
            msg(4, b, a, 4_000, true),
        ];

        let rollups = rollup(a, &log);
        assert_eq!(rollups.len(), 2);

        assert_eq!(rollups[0].counterpart_id, b);
        assert_eq!(rollups[0].message_count, 3);
        assert_eq!(rollups[0].unread_count, 1);
        assert_eq!(rollups[0].last_message_body, "m4");

        assert_eq!(rollups[1].counterpart_id, c);
        assert_eq!(rollups[1].message_count, 1);
        // Messages a sent never count as unread for a.
        assert_eq!(rollups[1].unread_count, 0);
    }

    #[test]
    fn test_rollup_tie_breaks_on_id() {
        let (a, b) = (UserId::new(), UserId::new());
        // Same millisecond, delivered out of id order.
        let log = vec![msg(7, a, b, 5_000, false), msg(6, b, a, 5_000, false)];

        let rollups = rollup(a, &log);
        assert_eq!(rollups[0].last_message_id, 7);
        assert_eq!(rollups[0].last_message_body, "m7");
    }

    #[test]
    fn test_rollup_orders_by_recent_activity() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let log = vec![msg(1, a, c, 1_000, false), msg(2, a, b, 2_000, false)];

        let order: Vec<_> = rollup(a, &log).into_iter().map(|r| r.counterpart_id).collect();
        assert_eq!(order, vec![b, c]);
    }

    #[test]
    fn test_rollup_ignores_foreign_messages() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let rollups = rollup(a, &[msg(1, b, c, 1_000, false)]);
        assert!(rollups.is_empty());
    }

    #[test]
    fn test_summarize_scenario() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", &Pin::parse("111").unwrap()).unwrap();
        let b = db.create_user("bob", &Pin::parse("222").unwrap()).unwrap();
        let c = db.create_user("carol", &Pin::parse("333").unwrap()).unwrap();

        for i in 0..3 {
            db.append_message(a.id, b.id, &format!("a->b {i}")).unwrap();
        }
        db.append_message(b.id, a.id, "b->a").unwrap();
        db.append_message(a.id, c.id, "a->c").unwrap();

        let summaries = db.summarize(a.id).unwrap();
        assert_eq!(summaries.len(), 2);

        let for_b = summaries.iter().find(|s| s.counterpart_id == b.id).unwrap();
        assert_eq!(for_b.message_count, 4);
        assert_eq!(for_b.unread_count, 1);
        assert_eq!(for_b.counterpart_pin.as_ref().map(Pin::as_str), Some("222"));
        assert_eq!(
            for_b.message_count as usize,
            db.list_between(a.id, b.id).unwrap().len()
        );

        let for_c = summaries.iter().find(|s| s.counterpart_id == c.id).unwrap();
        assert_eq!(for_c.message_count, 1);
        assert_eq!(for_c.last_message_body, "a->c");

        // Most recent activity first; the a->c message was appended last.
        assert!(summaries[0].last_message_at >= summaries[1].last_message_at);
        assert_eq!(summaries[0].counterpart_id, c.id);
    }

    #[test]
    fn test_summarize_reflects_read_acknowledgment() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", &Pin::parse("111").unwrap()).unwrap();
        let b = db.create_user("bob", &Pin::parse("222").unwrap()).unwrap();

        db.append_message(b.id, a.id, "one").unwrap();
        db.append_message(b.id, a.id, "two").unwrap();
        assert_eq!(db.summarize(a.id).unwrap()[0].unread_count, 2);

        db.mark_read(a.id, b.id).unwrap();
        assert_eq!(db.summarize(a.id).unwrap()[0].unread_count, 0);
        // The sender's view never had unread messages from this thread.
        assert_eq!(db.summarize(b.id).unwrap()[0].unread_count, 0);
    }

    #[test]
    fn test_summarize_keeps_deleted_counterpart() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", &Pin::parse("111").unwrap()).unwrap();
        let b = db.create_user("bob", &Pin::parse("222").unwrap()).unwrap();

        db.append_message(a.id, b.id, "still here").unwrap();
        db.delete_user(b.id).unwrap();

        let summaries = db.summarize(a.id).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].counterpart_id, b.id);
        assert_eq!(summaries[0].counterpart_pin, None);
        assert_eq!(summaries[0].counterpart_username, None);
        assert_eq!(summaries[0].last_message_body, "still here");
    }

    #[test]
    fn test_summarize_empty_for_silent_user() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", &Pin::parse("111").unwrap()).unwrap();
        assert!(db.summarize(a.id).unwrap().is_empty());
    }
}
