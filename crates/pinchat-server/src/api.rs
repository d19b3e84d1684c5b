use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use pinchat_shared::{Pin, UserId};
use pinchat_store::{ConversationSummary, Message, Store, StoreError};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::bearer_token;
use crate::config::ServerConfig;
use crate::delivery::Delivery;
use crate::error::{DeliveryError, ServerError};
use crate::websocket::handle_websocket;

#[derive(Clone)]
pub struct AppState {
    pub delivery: Arc<Delivery>,
    pub store: Store,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/conversations", get(conversations))
        .route("/api/chat/messages/:pin", get(messages_with))
        .route("/api/chat/send", post(send))
        .route("/api/chat/read/:pin", post(mark_read))
        .route("/api/users/:pin", get(lookup_user))
        .route("/ws", get(handle_websocket))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    receiver_pin: String,
    message: String,
}

#[derive(Serialize)]
struct MarkReadResponse {
    updated: usize,
}

#[derive(Serialize)]
struct PublicProfile {
    id: UserId,
    username: String,
    pin: Pin,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Establish the caller from the bearer token.
async fn caller(headers: &HeaderMap, state: &AppState) -> Result<UserId, ServerError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(value)
        .ok_or_else(|| ServerError::Unauthorized("Missing bearer token".into()))?;

    state
        .delivery
        .verify_caller(token)
        .await
        .map_err(|e| match e {
            DeliveryError::StorageUnavailable(msg) => ServerError::Internal(msg),
            _ => ServerError::Unauthorized("Invalid token".into()),
        })
}

/// Resolve a PIN from the path, distinguishing malformed from unknown.
async fn counterpart(state: &AppState, pin: &str) -> Result<UserId, ServerError> {
    match state.store.resolve_by_pin(pin).await {
        Ok(identity) => Ok(identity.id),
        Err(StoreError::NotFound) => Err(ServerError::NotFound("User not found".into())),
        Err(e) => Err(e.into()),
    }
}

async fn conversations(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let user = caller(&headers, &state).await?;
    Ok(Json(state.store.summarize(user).await?))
}

async fn messages_with(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user = caller(&headers, &state).await?;
    let other = counterpart(&state, &pin).await?;
    Ok(Json(state.store.list_between(user, other).await?))
}

async fn send(
    headers: HeaderMap,
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let user = caller(&headers, &state).await?;
    let Json(req) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let message = state
        .delivery
        .send_message(user, &req.receiver_pin, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let user = caller(&headers, &state).await?;
    let other = counterpart(&state, &pin).await?;
    let updated = state.store.mark_read(user, other).await?;
    Ok(Json(MarkReadResponse { updated }))
}

async fn lookup_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Result<Json<PublicProfile>, ServerError> {
    caller(&headers, &state).await?;
    let identity = match state.store.resolve_by_pin(&pin).await {
        Ok(identity) => identity,
        Err(StoreError::NotFound) => return Err(ServerError::NotFound("User not found".into())),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(PublicProfile {
        id: identity.id,
        username: identity.username,
        pin: identity.pin,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
