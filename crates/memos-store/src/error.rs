//! Error types for the memos-store crate.
//!
//! All store and driver operations return [`StoreError`] via [`StoreResult`].
//! A lookup that matches nothing is `Ok(None)`, never an error.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the memo store or its drivers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A storage-level uniqueness constraint rejected a write.
    #[error("unique constraint violated on {field}")]
    Conflict { field: &'static str },

    /// The caller's cancellation token fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// Short-ID allocation gave up after the configured number of attempts.
    #[error("no free short id after {attempts} attempts")]
    ShortIdExhausted { attempts: u32 },

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl StoreError {
    /// Whether this error is a cancellation of the caller's context.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
