//! # pinchat-shared
//!
//! Identity and addressing primitives shared by the store and the server:
//! stable user ids, the public 3-digit PIN, and ephemeral live-connection ids.

pub mod constants;
pub mod error;
pub mod types;

pub use error::PinError;
pub use types::{ConnectionId, Pin, UserId};
