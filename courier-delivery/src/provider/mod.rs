//! Delivery providers
//!
//! A provider is an interchangeable backend that can send a message, answer a
//! liveness probe and report its typical latency. The orchestrator holds them
//! in preference order and only reaches them through their circuit breaker.

mod simulated;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::{
    simulated::{SimulatedProvider, SimulatedProviderConfig},
    test::{Script, TestProvider},
};
use crate::error::ProviderError;

/// Proof of a successful send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-assigned id of the delivered message
    pub message_id: String,
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync + Debug {
    /// Stable name, used for breaker, stats and log correlation
    fn name(&self) -> &str;

    /// Short human readable role, shown on the dashboard
    fn description(&self) -> &str {
        ""
    }

    /// Send one message
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider did not accept the message.
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, ProviderError>;

    /// Liveness probe, independent of the circuit breaker
    async fn is_healthy(&self) -> bool;

    /// Typical send latency in milliseconds
    fn average_latency_ms(&self) -> u64;
}
