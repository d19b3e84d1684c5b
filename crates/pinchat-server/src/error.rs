use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pinchat_store::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

/// Failures of the delivery core, shared by the REST and live-connection
/// paths.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Malformed PIN, empty or oversized body, self-send. Nothing was
    /// written.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No user holds PIN {0}")]
    ReceiverNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Storage failed. A send that returned this was not persisted.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Stable machine-readable tag for a [`DeliveryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    ReceiverNotFound,
    Unauthorized,
    StorageUnavailable,
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DeliveryError::ReceiverNotFound(_) => ErrorKind::ReceiverNotFound,
            DeliveryError::Unauthorized(_) => ErrorKind::Unauthorized,
            DeliveryError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Text safe to show the caller. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            DeliveryError::StorageUnavailable(_) => "Failed to send message".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidArgument(msg) => DeliveryError::InvalidArgument(msg),
            other => DeliveryError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<AuthError> for DeliveryError {
    fn from(e: AuthError) -> Self {
        DeliveryError::Unauthorized(e.to_string())
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DeliveryError> for ServerError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::InvalidArgument(msg) => ServerError::BadRequest(msg),
            DeliveryError::ReceiverNotFound(_) => ServerError::NotFound("User not found".into()),
            DeliveryError::Unauthorized(msg) => ServerError::Unauthorized(msg),
            DeliveryError::StorageUnavailable(msg) => ServerError::Internal(msg),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidArgument(msg) => ServerError::BadRequest(msg),
            StoreError::NotFound => ServerError::NotFound("Record not found".into()),
            StoreError::Conflict(msg) => ServerError::BadRequest(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
