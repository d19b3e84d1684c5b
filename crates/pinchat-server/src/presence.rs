//! Process-local presence: which live connections belong to which user.
//!
//! Each live connection owns a bounded outbound queue drained by its socket
//! writer. The registry maps connection ids to the user bound on them (and
//! the reverse index) plus a sender into each queue. Pushes use `try_send`,
//! so a slow or vanished peer never holds up the caller. A peer that cannot
//! take a push loses its binding; a slow one is also told to close, so its
//! client reconnects and reloads history instead of silently missing events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pinchat_shared::{ConnectionId, UserId};
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, warn};

use crate::protocol::ServerEvent;

/// Sending side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerEvent>,
    evicted: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle with a queue of `depth` events. The receiver is the
    /// connection's writer side.
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (outbound, rx) = mpsc::channel(depth.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            outbound,
            evicted: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for this connection only. Returns `false` if the
    /// queue is full or the writer has gone away.
    pub fn emit(&self, event: ServerEvent) -> bool {
        self.outbound.try_send(event).is_ok()
    }

    /// Resolves once the registry has dropped this connection for falling
    /// behind. The transport should close the socket.
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }

    fn evict(&self) {
        self.evicted.notify_one();
    }
}

struct Binding {
    user: UserId,
    handle: ConnectionHandle,
}

#[derive(Default)]
struct Inner {
    by_connection: HashMap<ConnectionId, Binding>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Inner {
    fn remove(&mut self, id: ConnectionId) -> Option<Binding> {
        let binding = self.by_connection.remove(&id)?;
        if let Some(set) = self.by_user.get_mut(&binding.user) {
            set.remove(&id);
            if set.is_empty() {
                self.by_user.remove(&binding.user);
            }
        }
        Some(binding)
    }
}

/// Shared connection-to-identity registry. Cheap to clone; clones share
/// state.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `user`, replacing whatever it was bound to before.
    pub async fn bind(&self, handle: &ConnectionHandle, user: UserId) {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.remove(handle.id) {
            if previous.user != user {
                debug!(conn = %handle.id, from = %previous.user, to = %user, "Connection rebound");
            }
        }
        inner.by_connection.insert(
            handle.id,
            Binding {
                user,
                handle: handle.clone(),
            },
        );
        let count = {
            let set = inner.by_user.entry(user).or_default();
            set.insert(handle.id);
            set.len()
        };

        debug!(conn = %handle.id, user = %user, connections = count, "Connection bound");
    }

    /// Drop the binding for `id`, if any. Safe to call repeatedly.
    pub async fn unbind(&self, id: ConnectionId) {
        let removed = self.inner.write().await.remove(id);
        if let Some(binding) = removed {
            debug!(conn = %id, user = %binding.user, "Connection unbound");
        }
    }

    /// All live connections currently bound to `user`.
    pub async fn handles_for(&self, user: UserId) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .by_user
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of users with at least one bound connection.
    pub async fn online_users(&self) -> usize {
        self.inner.read().await.by_user.len()
    }

    /// Deliver `event` to every connection bound to `user`; returns how many
    /// accepted it.
    ///
    /// Connections that cannot take the event are removed from the
    /// registry. Those with a full queue are additionally signalled through
    /// [`ConnectionHandle::evicted`].
    pub async fn push(&self, user: UserId, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        let mut slow = Vec::new();

        {
            let inner = self.inner.read().await;
            let Some(ids) = inner.by_user.get(&user) else {
                return 0;
            };
            for id in ids {
                let Some(binding) = inner.by_connection.get(id) else {
                    continue;
                };
                match binding.handle.outbound.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => slow.push(*id),
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() || !slow.is_empty() {
            let mut inner = self.inner.write().await;
            for id in dead {
                // Only evict if the binding still points at a closed queue;
                // the id may have been rebound in between.
                let closed = inner
                    .by_connection
                    .get(&id)
                    .is_some_and(|b| b.handle.outbound.is_closed());
                if closed {
                    inner.remove(id);
                    debug!(conn = %id, user = %user, "Evicted dead connection");
                }
            }
            for id in slow {
                if let Some(binding) = inner.remove(id) {
                    binding.handle.evict();
                    warn!(conn = %id, user = %binding.user, "Outbound queue full, evicting connection");
                }
            }
        }

        delivered
    }
}
