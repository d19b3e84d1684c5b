//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use pinchat_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_OUTBOUND_QUEUE_DEPTH,
    DEFAULT_TOKEN_TTL_HOURS, MAX_TOKEN_TTL_HOURS,
};

const DEV_JWT_SECRET: &str = "pinchat-development-secret-change-me";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file. Parent directories are created on startup.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/pinchat.db`
    pub database_path: PathBuf,

    /// HMAC secret for identity tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development secret.
    pub jwt_secret: String,

    /// Lifetime of freshly issued identity tokens.
    /// Env: `TOKEN_TTL_HOURS`
    /// Default: `168` (one week), at most one year.
    pub token_ttl_hours: u64,

    /// Longest accepted message body in bytes.
    /// Env: `MAX_MESSAGE_LENGTH`
    /// Default: `2048`
    pub max_message_length: usize,

    /// Events buffered per live connection before pushes to it are dropped.
    /// Env: `OUTBOUND_QUEUE_DEPTH`
    /// Default: `64`
    pub outbound_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/pinchat.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
        }
    }
}

// Hand-written so the secret never reaches the logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("max_message_length", &self.max_message_length)
            .field("outbound_queue_depth", &self.outbound_queue_depth)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            if !secret.is_empty() {
                config.jwt_secret = secret;
            }
        }

        if let Some(val) = lookup("TOKEN_TTL_HOURS") {
            match val.parse::<u64>() {
                Ok(n) if (1..=MAX_TOKEN_TTL_HOURS).contains(&n) => config.token_ttl_hours = n,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_HOURS, using default"),
            }
        }

        if let Some(val) = lookup("MAX_MESSAGE_LENGTH") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_length = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_MESSAGE_LENGTH, using default"),
            }
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE_DEPTH") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_queue_depth = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE_DEPTH, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// True while the built-in development secret is in use.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
