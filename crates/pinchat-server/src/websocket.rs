//! WebSocket transport for live connections.
//!
//! Each socket gets a [`LiveConnection`] and a writer task draining its
//! outbound queue. Inbound frames are handed to the coordinator one at a
//! time; closing the socket unbinds the connection. A connection the
//! presence registry evicts for falling behind is closed from this side.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::delivery::LiveConnection;
use crate::error::ErrorKind;
use crate::presence::ConnectionHandle;
use crate::protocol::{ClientEvent, ServerEvent};

/// Handle WebSocket upgrade
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let (handle, mut outbound) = ConnectionHandle::new(state.config.outbound_queue_depth);
    let mut conn = LiveConnection::open(handle);
    debug!(conn = %conn.handle().id(), "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let evicted = conn.handle().clone();

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = evicted.evicted() => {
                debug!(conn = %conn.handle().id(), "Connection fell behind, closing");
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };

        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.delivery.handle_event(&mut conn, event).await,
                Err(e) => {
                    conn.handle().emit(ServerEvent::MessageError {
                        kind: ErrorKind::InvalidArgument,
                        reason: format!("Malformed event: {e}"),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn.handle().id(), error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    debug!(conn = %conn.handle().id(), state = ?conn.state(), "WebSocket closing");
    state.delivery.disconnect(&mut conn).await;
    writer.abort();
}
