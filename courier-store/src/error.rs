//! Error types for the courier-store crate.

use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Message not found in the store.
    #[error("Message not found: {0}")]
    NotFound(String),

    /// A message with this id already exists.
    #[error("Message already exists: {0}")]
    AlreadyExists(String),

    /// The backend refused the operation (unavailable, full, ...).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
