use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller supplied a value that can never be stored.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The database handle could not be reached (poisoned lock, aborted
    /// blocking task) or holds data this build cannot represent.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for failures of the storage layer itself, as opposed to
    /// rejections of the caller's input.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_)
                | StoreError::Io(_)
                | StoreError::Migration(_)
                | StoreError::Unavailable(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
