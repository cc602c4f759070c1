//! Typed error handling for submission and delivery.
//!
//! This module distinguishes between:
//! - Submission failures (validation, rate limiting, storage) surfaced to the caller
//! - Delivery failures, which are retried according to policy unless terminal
//! - Provider and circuit breaker failures that feed the delivery taxonomy

use std::time::Duration;

use courier_store::StoreError;
use thiserror::Error;

/// A malformed submission, rejected before any state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Recipient is required")]
    MissingRecipient,

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Subject is required")]
    MissingSubject,

    #[error("Message body is required")]
    MissingBody,

    #[error("Unknown priority: {0}")]
    UnknownPriority(String),
}

/// Why a submission was refused.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The outbound rate ceiling was hit; `retry_after` is when capacity frees up.
    #[error("Rate limit exceeded, retry after {}s", ceil_secs(.retry_after))]
    RateLimitExceeded { retry_after: Duration },

    /// The message could not be persisted; nothing was enqueued.
    #[error("Failed to store message: {0}")]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// Retry-after hint in whole seconds, rounded up, for rate-limit refusals
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(ceil_secs(retry_after)),
            _ => None,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn ceil_secs(duration: &Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

/// Outcome of a failed delivery attempt cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The provider's breaker is open, it was skipped.
    #[error("Provider {0} unavailable: circuit open")]
    ProviderUnavailable(String),

    /// The provider exhausted its inner retries.
    #[error("Delivery via {provider} failed: {reason}")]
    DeliveryFailure { provider: String, reason: String },

    /// Every provider was skipped or failed during one attempt cycle.
    #[error("All providers failed: {0}")]
    AllProvidersFailed(String),

    /// The message reached its retry ceiling and is now failed.
    #[error("Email {id} failed permanently after {attempts} attempts: {reason}")]
    MaxRetriesExceeded {
        id: String,
        attempts: u32,
        reason: String,
    },
}

impl DeliveryError {
    /// Whether the message will never be attempted again
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }
}

/// A provider's own failure to send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider}: {reason}")]
pub struct ProviderError {
    pub provider: String,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitError<E> {
    /// The call was refused without invoking the operation.
    #[error("Circuit open for {0}")]
    Open(String),

    /// The operation ran and failed; its error is passed through unchanged.
    #[error(transparent)]
    Inner(E),
}
