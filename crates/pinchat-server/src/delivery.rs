//! Delivery coordinator.
//!
//! Both ingestion paths (REST and live connection) end up in
//! [`Delivery::send_message`]: resolve the receiver's PIN, append to the
//! log, then push the stored record to every live connection of both
//! participants. The coordinator also drives the per-connection
//! authentication handshake.

use std::sync::Arc;

use pinchat_shared::UserId;
use pinchat_store::{Message, Store, StoreError};
use tracing::{debug, info, warn};

use crate::auth::IdentityVerifier;
use crate::error::DeliveryError;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::protocol::{ClientEvent, ServerEvent};

/// Lifecycle of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated(UserId),
    Closed,
}

/// A live connection as seen by the coordinator.
#[derive(Debug)]
pub struct LiveConnection {
    handle: ConnectionHandle,
    state: ConnectionState,
}

impl LiveConnection {
    pub fn open(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: ConnectionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    fn emit(&self, event: ServerEvent) {
        if !self.handle.emit(event) {
            debug!(conn = %self.handle.id(), "Could not queue event for connection");
        }
    }
}

pub struct Delivery {
    store: Store,
    presence: PresenceRegistry,
    verifier: Arc<dyn IdentityVerifier>,
    max_message_length: usize,
}

impl Delivery {
    pub fn new(
        store: Store,
        presence: PresenceRegistry,
        verifier: Arc<dyn IdentityVerifier>,
        max_message_length: usize,
    ) -> Self {
        Self {
            store,
            presence,
            verifier,
            max_message_length,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Turn an identity token into a user that exists in the directory.
    pub async fn verify_caller(&self, token: &str) -> Result<UserId, DeliveryError> {
        let user = self.verifier.verify_identity_token(token)?;
        match self.store.resolve_by_id(user).await {
            Ok(identity) => Ok(identity.id),
            Err(StoreError::NotFound) => Err(DeliveryError::Unauthorized(
                "Unknown identity".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Handshake for a live connection.
    ///
    /// On success the connection is bound in the presence registry and
    /// becomes `Authenticated`. On failure it gets an `auth_error` event and
    /// keeps its previous state; the client may retry.
    pub async fn authenticate(
        &self,
        conn: &mut LiveConnection,
        token: &str,
    ) -> Result<UserId, DeliveryError> {
        if conn.state == ConnectionState::Closed {
            return Err(DeliveryError::Unauthorized("Connection closed".to_string()));
        }

        let user = match self.verify_caller(token).await {
            Ok(user) => user,
            Err(e) => {
                debug!(conn = %conn.handle.id(), error = %e, "Authentication failed");
                let reason = match &e {
                    DeliveryError::StorageUnavailable(_) => "Authentication unavailable",
                    _ => "Invalid token",
                };
                conn.emit(ServerEvent::AuthError {
                    reason: reason.to_string(),
                });
                return Err(e);
            }
        };

        self.presence.bind(&conn.handle, user).await;
        conn.state = ConnectionState::Authenticated(user);
        conn.emit(ServerEvent::Authenticated { user_id: user });

        info!(conn = %conn.handle.id(), user = %user, "Live connection authenticated");
        Ok(user)
    }

    /// The single send path.
    ///
    /// Input is validated before anything is written. Once the append
    /// succeeds the stored record is pushed to both participants; push
    /// misses are not errors.
    pub async fn send_message(
        &self,
        caller: UserId,
        receiver_pin: &str,
        body: &str,
    ) -> Result<Message, DeliveryError> {
        if body.len() > self.max_message_length {
            return Err(DeliveryError::InvalidArgument(format!(
                "Message too long (max {} bytes)",
                self.max_message_length
            )));
        }

        let receiver = match self.store.resolve_by_pin(receiver_pin).await {
            Ok(identity) => identity,
            Err(StoreError::NotFound) => {
                return Err(DeliveryError::ReceiverNotFound(receiver_pin.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let message = self
            .store
            .append(caller, receiver.id, body)
            .await
            .map_err(|e| {
                if e.is_unavailable() {
                    warn!(sender = %caller, error = %e, "Append failed");
                }
                DeliveryError::from(e)
            })?;

        let event = ServerEvent::NewMessage {
            message: message.clone(),
        };
        let to_sender = self.presence.push(caller, &event).await;
        let to_receiver = self.presence.push(receiver.id, &event).await;

        info!(
            id = message.id,
            sender = %caller,
            receiver = %receiver.id,
            to_sender,
            to_receiver,
            "Message delivered"
        );

        Ok(message)
    }

    /// Dispatch one inbound frame from a live connection.
    pub async fn handle_event(&self, conn: &mut LiveConnection, event: ClientEvent) {
        match event {
            ClientEvent::Authenticate { token } => {
                // Failures were already reported to the connection.
                let _ = self.authenticate(conn, &token).await;
            }
            ClientEvent::SendMessage {
                receiver_pin,
                message,
            } => {
                let ConnectionState::Authenticated(caller) = conn.state else {
                    debug!(conn = %conn.handle.id(), "Ignoring send on unauthenticated connection");
                    return;
                };
                // On success the sender's own connections, this one
                // included, get the record through presence.
                if let Err(e) = self.send_message(caller, &receiver_pin, &message).await {
                    conn.emit(ServerEvent::send_failed(&e));
                }
            }
        }
    }

    /// Tear down a live connection. Idempotent.
    pub async fn disconnect(&self, conn: &mut LiveConnection) {
        if conn.state == ConnectionState::Closed {
            return;
        }
        self.presence.unbind(conn.handle.id()).await;
        conn.state = ConnectionState::Closed;
        debug!(conn = %conn.handle.id(), "Live connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::error::ErrorKind;
    use pinchat_shared::Pin;
    use pinchat_store::Identity;
    use tokio::sync::mpsc;

    struct Fixture {
        delivery: Delivery,
        jwt: JwtVerifier,
        store: Store,
        alice: Identity,
        bob: Identity,
    }

    async fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", Pin::parse("111").unwrap()).await.unwrap();
        let bob = store.create_user("bob", Pin::parse("222").unwrap()).await.unwrap();
        let jwt = JwtVerifier::new("test-secret", 1);
        let delivery = Delivery::new(
            store.clone(),
            PresenceRegistry::new(),
            Arc::new(jwt.clone()),
            64,
        );
        Fixture {
            delivery,
            jwt,
            store,
            alice,
            bob,
        }
    }

    fn connect() -> (LiveConnection, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::new(16);
        (LiveConnection::open(handle), rx)
    }

    async fn connect_as(f: &Fixture, who: &Identity) -> (LiveConnection, mpsc::Receiver<ServerEvent>) {
        let (mut conn, mut rx) = connect();
        let token = f.jwt.issue_token(who.id).unwrap();
        f.delivery.authenticate(&mut conn, &token).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Authenticated { user_id: who.id });
        (conn, rx)
    }

    #[tokio::test]
    async fn test_authenticate_binds_connection() {
        let f = fixture().await;
        let (conn, _rx) = connect_as(&f, &f.alice).await;

        assert_eq!(conn.state(), ConnectionState::Authenticated(f.alice.id));
        assert!(f
            .delivery
            .presence()
            .handles_for(f.alice.id)
            .await
            .contains(&conn.handle().id()));
    }

    #[tokio::test]
    async fn test_bad_token_emits_auth_error_and_allows_retry() {
        let f = fixture().await;
        let (mut conn, mut rx) = connect();

        let err = f.delivery.authenticate(&mut conn, "garbage").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthorized(_)));
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::AuthError { .. }));
        assert_eq!(conn.state(), ConnectionState::Unauthenticated);

        let token = f.jwt.issue_token(f.alice.id).unwrap();
        f.delivery.authenticate(&mut conn, &token).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Authenticated(f.alice.id));
    }

    #[tokio::test]
    async fn test_token_for_unknown_identity_rejected() {
        let f = fixture().await;
        let (mut conn, mut rx) = connect();
        let token = f.jwt.issue_token(UserId::new()).unwrap();

        assert!(f.delivery.authenticate(&mut conn, &token).await.is_err());
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::AuthError { .. }));
    }

    #[tokio::test]
    async fn test_send_fans_out_to_both_participants() {
        let f = fixture().await;
        let (_a, mut alice_rx) = connect_as(&f, &f.alice).await;
        let (_b, mut bob_rx) = connect_as(&f, &f.bob).await;

        let message = f.delivery.send_message(f.alice.id, "222", "hi").await.unwrap();
        assert_eq!(message.sender_id, f.alice.id);
        assert_eq!(message.receiver_id, f.bob.id);
        assert_eq!(message.body, "hi");
        assert!(!message.read);

        let expected = ServerEvent::NewMessage {
            message: message.clone(),
        };
        assert_eq!(alice_rx.try_recv().unwrap(), expected);
        assert_eq!(bob_rx.try_recv().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_send_to_unknown_pin_creates_nothing() {
        let f = fixture().await;

        let err = f.delivery.send_message(f.alice.id, "999", "hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::ReceiverNotFound(ref pin) if pin == "999"));
        assert!(f.store.list_for_user(f.alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_rejects_bad_input() {
        let f = fixture().await;

        for (pin, body) in [("22", "hi"), ("222", ""), ("111", "to myself")] {
            let err = f.delivery.send_message(f.alice.id, pin, body).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "pin={pin} body={body:?}");
        }

        let long = "x".repeat(65);
        let err = f.delivery.send_message(f.alice.id, "222", &long).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert!(f.store.list_for_user(f.alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_live_connections_still_persists() {
        let f = fixture().await;
        let message = f.delivery.send_message(f.bob.id, "111", "offline").await.unwrap();

        let history = f.store.list_between(f.alice.id, f.bob.id).await.unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn test_live_send_event_matches_rest_record() {
        let f = fixture().await;
        let (mut alice, mut alice_rx) = connect_as(&f, &f.alice).await;
        let (_b, mut bob_rx) = connect_as(&f, &f.bob).await;

        f.delivery
            .handle_event(
                &mut alice,
                ClientEvent::SendMessage {
                    receiver_pin: "222".into(),
                    message: "live".into(),
                },
            )
            .await;

        let stored = f.store.list_between(f.alice.id, f.bob.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        let expected = ServerEvent::NewMessage {
            message: stored[0].clone(),
        };
        assert_eq!(alice_rx.try_recv().unwrap(), expected);
        assert_eq!(bob_rx.try_recv().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_unauthenticated_send_is_ignored() {
        let f = fixture().await;
        let (mut conn, mut rx) = connect();

        f.delivery
            .handle_event(
                &mut conn,
                ClientEvent::SendMessage {
                    receiver_pin: "222".into(),
                    message: "sneaky".into(),
                },
            )
            .await;

        assert!(rx.try_recv().is_err());
        assert!(f.store.list_for_user(f.bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_send_error_goes_to_sender_only() {
        let f = fixture().await;
        let (mut alice, mut alice_rx) = connect_as(&f, &f.alice).await;

        f.delivery
            .handle_event(
                &mut alice,
                ClientEvent::SendMessage {
                    receiver_pin: "999".into(),
                    message: "hello?".into(),
                },
            )
            .await;

        match alice_rx.try_recv().unwrap() {
            ServerEvent::MessageError { kind, .. } => assert_eq!(kind, ErrorKind::ReceiverNotFound),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_unbinds_and_is_idempotent() {
        let f = fixture().await;
        let (mut conn, _rx) = connect_as(&f, &f.alice).await;

        f.delivery.disconnect(&mut conn).await;
        f.delivery.disconnect(&mut conn).await;

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(f.delivery.presence().handles_for(f.alice.id).await.is_empty());

        // A closed connection cannot come back.
        let token = f.jwt.issue_token(f.alice.id).unwrap();
        assert!(f.delivery.authenticate(&mut conn, &token).await.is_err());
    }

    #[tokio::test]
    async fn test_multiple_devices_all_receive() {
        let f = fixture().await;
        let (_p, mut phone) = connect_as(&f, &f.bob).await;
        let (_l, mut laptop) = connect_as(&f, &f.bob).await;

        let message = f.delivery.send_message(f.alice.id, "222", "ping").await.unwrap();
        let expected = ServerEvent::NewMessage { message };
        assert_eq!(phone.try_recv().unwrap(), expected);
        assert_eq!(laptop.try_recv().unwrap(), expected);
    }
}
