//! Policy abstractions for delivery operations.
//!
//! - [`RetryPolicy`]: how often and how late failed deliveries are retried

pub mod retry;

pub use retry::RetryPolicy;
