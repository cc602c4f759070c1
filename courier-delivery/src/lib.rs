//! Admission, scheduling and delivery of outbound messages
//!
//! This crate provides:
//! - Sliding-window admission control ([`RateLimiter`])
//! - Per-provider failure isolation ([`CircuitBreaker`])
//! - A priority and schedule aware [`RetryQueue`] with exponential backoff
//! - The [`DeliveryOrchestrator`] tying submissions, dispatch and providers together
//! - Read-only dashboard summaries ([`StatsAggregator`])

mod circuit_breaker;
mod error;
mod idempotency;
pub mod policy;
mod processor;
pub mod provider;
pub mod queue;
mod rate_limiter;
mod stats;
mod types;

// Re-export breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitBreakers, CircuitState,
};
// Re-export error types
pub use error::{
    CircuitError, DeliveryError, ProviderError, SubmitError, ValidationError,
};
pub use idempotency::IdempotencyKeys;
pub use policy::RetryPolicy;
// Re-export core types
pub use processor::{DeliveryConfig, DeliveryOrchestrator, TickOutcome};
pub use provider::{
    DeliveryProvider, Script, SendReceipt, SimulatedProvider, SimulatedProviderConfig,
    TestProvider,
};
pub use queue::RetryQueue;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use stats::{DashboardStats, ProviderHealth, ProviderStatus, StatsAggregator};
pub use types::{QueueEntry, SubmitRequest, SubmitResponse, SubmitStatus};
