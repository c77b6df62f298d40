use thiserror::Error;

/// Result type for outbox operations
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Infrastructure errors for outbox operations
#[derive(Error, Debug, Clone)]
pub enum OutboxError {
    #[error("Outbox not initialized: call init() first")]
    NotInitialized,

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OutboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
