/// Number of ASCII digits in a public PIN.
pub const PIN_LENGTH: usize = 3;

/// Default upper bound on a message body, in bytes.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2048;

/// Default capacity of a live connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Identity tokens are valid for a week unless configured otherwise.
pub const DEFAULT_TOKEN_TTL_HOURS: u64 = 24 * 7;

/// Longest accepted token lifetime (one year).
pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;
