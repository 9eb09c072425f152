//! Error types for the upsert sink layer

use thiserror::Error;

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Errors that can occur while writing batches to a store.
///
/// The split drives the retry policy: transient failures consume the retry
/// budget, permanent ones surface immediately without touching it.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Recoverable store failure (connection reset, timeout); retried
    #[error("transient store error: {0}")]
    Transient(String),

    /// Non-recoverable failure (constraint violation off the upsert key,
    /// malformed statement); never retried
    #[error("permanent store error: {0}")]
    Permanent(String),

    /// The whole retry budget was spent on one batch; raised exactly once
    /// per failing batch, after which the batch is dropped
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}
