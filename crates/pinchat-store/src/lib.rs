//! # pinchat-store
//!
//! Durable storage for the PIN messenger, backed by SQLite.
//!
//! The synchronous [`Database`] handle wraps a `rusqlite::Connection` and
//! exposes typed helpers for the identity directory, the append-only message
//! log and the per-counterpart conversation rollup. [`Store`] wraps it for use
//! from async code: every call runs on the blocking thread pool so storage
//! I/O never stalls the runtime.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::Store;
