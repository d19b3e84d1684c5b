//! # pinchat-server
//!
//! Two-party messaging server where users address each other by a short
//! numeric PIN.
//!
//! This binary provides:
//! - **REST API** (axum) for conversation history, summaries, sending, and
//!   read acknowledgements
//! - **Live connections** over WebSocket that receive `new_message` pushes
//!   on every device a user has open
//! - **Operator commands** for creating users and issuing identity tokens

mod api;
mod auth;
mod config;
mod delivery;
mod error;
mod presence;
mod protocol;
mod websocket;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use pinchat_shared::Pin;
use pinchat_store::{Store, StoreError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::JwtVerifier;
use crate::config::ServerConfig;
use crate::delivery::Delivery;
use crate::presence::PresenceRegistry;

#[derive(Parser, Debug)]
#[command(name = "pinchat-server")]
#[command(about = "PIN-addressed messaging server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP and WebSocket server (default)
    Serve,

    /// Register a user in the identity directory
    CreateUser {
        /// Display name, unique across the directory
        username: String,

        /// Three-digit PIN, unique across the directory
        pin: String,
    },

    /// Print an identity token for an existing user
    IssueToken {
        /// PIN of the user to issue a token for
        pin: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pinchat_server=debug")),
        )
        .init();

    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Load configuration and open storage
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.uses_dev_secret() {
        warn!("JWT_SECRET is not set; using the development secret");
    }

    let store = Store::open_at(&config.database_path)?;
    let jwt = JwtVerifier::new(&config.jwt_secret, config.token_ttl_hours);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config, store, jwt).await,
        Commands::CreateUser { username, pin } => {
            let pin = Pin::parse(&pin)?;
            match store.create_user(&username, pin).await {
                Ok(identity) => {
                    info!(user = %identity.id, pin = %identity.pin, "User created");
                    println!("{}", identity.id);
                    Ok(())
                }
                Err(StoreError::Conflict(what)) => {
                    anyhow::bail!("{what} is already taken")
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::IssueToken { pin } => {
            let identity = match store.resolve_by_pin(&pin).await {
                Ok(identity) => identity,
                Err(StoreError::NotFound) => anyhow::bail!("no user with PIN {pin}"),
                Err(e) => return Err(e.into()),
            };
            println!("{}", jwt.issue_token(identity.id)?);
            Ok(())
        }
    }
}

async fn run_server(config: ServerConfig, store: Store, jwt: JwtVerifier) -> anyhow::Result<()> {
    info!("Starting pinchat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 3. Wire the delivery coordinator
    // -----------------------------------------------------------------------
    let delivery = Arc::new(Delivery::new(
        store.clone(),
        PresenceRegistry::new(),
        Arc::new(jwt),
        config.max_message_length,
    ));

    let http_addr = config.http_addr;
    let app_state = AppState {
        delivery: delivery.clone(),
        store,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let online = delivery.presence().online_users().await;
            info!(online, "Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
