//! Async, clonable handle over SQLite.
//!
//! `rusqlite::Connection` is blocking and not `Sync`, so every connection
//! sits behind its own mutex and each operation runs on tokio's blocking
//! pool. Writes go through a single writer connection; AUTOINCREMENT ids and
//! the clamped timestamp in [`Database::append_message`] give every append a
//! place in one total order. A file-backed store also opens a few read-only
//! connections, so lookups, history and summaries never queue behind the
//! writer or behind each other (WAL lets them read while a write is in
//! flight).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pinchat_shared::{Pin, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ConversationSummary, Identity, Message};

/// Read-only connections opened next to the writer by [`Store::open_at`].
pub const DEFAULT_READ_CONNECTIONS: usize = 4;

#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Database>>,
    readers: Arc<[Mutex<Database>]>,
    next_reader: Arc<AtomicUsize>,
}

impl Store {
    /// Wrap a single connection that serves both reads and writes.
    pub fn new(db: Database) -> Self {
        Self::with_readers(db, Vec::new())
    }

    fn with_readers(writer: Database, readers: Vec<Database>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: readers.into_iter().map(Mutex::new).collect(),
            next_reader: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Self::open_with_readers(path, DEFAULT_READ_CONNECTIONS)
    }

    /// Open the writer (creating and migrating the file) and then
    /// `read_connections` read-only connections to it.
    pub fn open_with_readers(path: &Path, read_connections: usize) -> Result<Self> {
        let writer = Database::open_at(path)?;
        let readers = (0..read_connections)
            .map(|_| Database::open_reader(path))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(path = %path.display(), readers = readers.len(), "store ready");
        Ok(Self::with_readers(writer, readers))
    }

    /// In-memory databases are private to one connection, so reads share
    /// the writer.
    pub fn open_in_memory() -> Result<Self> {
        Database::open_in_memory().map(Self::new)
    }

    async fn write<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = writer
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
            op(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }

    async fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.readers.is_empty() {
            return self.write(move |db| op(db)).await;
        }

        let readers = self.readers.clone();
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || {
            // Prefer an idle connection; fall back to waiting on our turn.
            let n = readers.len();
            let idle = (0..n).find_map(|i| readers[(start + i) % n].try_lock().ok());
            let guard = match idle {
                Some(guard) => guard,
                None => readers[start % n]
                    .lock()
                    .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?,
            };
            op(&*guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }

    // ------------------------------------------------------------------
    // Identity directory
    // ------------------------------------------------------------------

    /// Resolve a raw PIN string. Malformed input is rejected before any
    /// query runs.
    pub async fn resolve_by_pin(&self, raw_pin: &str) -> Result<Identity> {
        let pin = Pin::parse(raw_pin).map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        self.read(move |db| db.find_user_by_pin(&pin)).await
    }

    pub async fn resolve_by_id(&self, id: UserId) -> Result<Identity> {
        self.read(move |db| db.find_user_by_id(id)).await
    }

    pub async fn create_user(&self, username: &str, pin: Pin) -> Result<Identity> {
        let username = username.to_string();
        self.write(move |db| db.create_user(&username, &pin)).await
    }

    // ------------------------------------------------------------------
    // Message log
    // ------------------------------------------------------------------

    pub async fn append(&self, sender: UserId, receiver: UserId, body: &str) -> Result<Message> {
        let body = body.to_string();
        self.write(move |db| db.append_message(sender, receiver, &body))
            .await
    }

    pub async fn list_between(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        self.read(move |db| db.list_between(a, b)).await
    }

    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<Message>> {
        self.read(move |db| db.list_for_user(user)).await
    }

    pub async fn mark_read(&self, reader: UserId, counterpart: UserId) -> Result<usize> {
        self.write(move |db| db.mark_read(reader, counterpart)).await
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn summarize(&self, user: UserId) -> Result<Vec<ConversationSummary>> {
        self.read(move |db| db.summarize(user)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_by_pin_validates_first() {
        let store = Store::open_in_memory().unwrap();
        for bad in ["", "12", "1234", "abc"] {
            assert!(matches!(
                store.resolve_by_pin(bad).await,
                Err(StoreError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            store.resolve_by_pin("123").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_total_order() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_user("alice", Pin::parse("111").unwrap()).await.unwrap();
        let b = store.create_user("bob", Pin::parse("222").unwrap()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            tasks.push(tokio::spawn(async move {
                store.append(from, to, &format!("m{i}")).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let history = store.list_between(a.id, b.id).await.unwrap();
        assert_eq!(history.len(), 32);
        for pair in history.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_the_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(&dir.path().join("chat.db")).unwrap();
        let a = store.create_user("alice", Pin::parse("111").unwrap()).await.unwrap();
        let b = store.create_user("bob", Pin::parse("222").unwrap()).await.unwrap();
        store.append(a.id, b.id, "hello").await.unwrap();

        // Stand in for a long write by holding the writer connection.
        let busy = store.writer.lock().unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), store.summarize(a.id))
            .await
            .expect("summary queued behind the writer")
            .unwrap();
        let history = tokio::time::timeout(Duration::from_secs(5), store.list_between(a.id, b.id))
            .await
            .expect("history queued behind the writer")
            .unwrap();
        let found = tokio::time::timeout(Duration::from_secs(5), store.resolve_by_pin("222"))
            .await
            .expect("lookup queued behind the writer")
            .unwrap();

        drop(busy);

        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].counterpart_username.as_deref(), Some("bob"));
        assert_eq!(history.len(), 1);
        assert_eq!(found.id, b.id);
    }

    #[tokio::test]
    async fn test_readers_see_committed_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_with_readers(&dir.path().join("chat.db"), 2).unwrap();
        let a = store.create_user("alice", Pin::parse("111").unwrap()).await.unwrap();
        let b = store.create_user("bob", Pin::parse("222").unwrap()).await.unwrap();

        for i in 0..6 {
            let sent = store.append(a.id, b.id, &format!("m{i}")).await.unwrap();
            // Every reader, whichever serves the call, sees the append.
            let history = store.list_between(a.id, b.id).await.unwrap();
            assert_eq!(history.last(), Some(&sent));
            assert_eq!(history.len(), i + 1);
        }

        assert_eq!(store.mark_read(b.id, a.id).await.unwrap(), 6);
        assert_eq!(store.summarize(b.id).await.unwrap()[0].unread_count, 0);
    }
}
