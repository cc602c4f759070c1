use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use ulid::Ulid;

use super::{DeliveryProvider, SendReceipt};
use crate::error::ProviderError;

/// Behaviour of a [`SimulatedProvider`]
///
/// ```ron
/// providers: [
///     (
///         name: "MockProvider A",
///         description: "Primary email provider",
///         id_prefix: "mp_a",
///         latency_ms: 125,
///         latency_jitter_ms: 50,
///         failure_rate: 0.008,
///         availability: 0.95,
///         failure_message: "Connection timeout",
///     ),
/// ]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedProviderConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Prefix of generated message ids
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    /// Base latency of a send (milliseconds)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Uniform random latency added on top of `latency_ms` (milliseconds)
    #[serde(default)]
    pub latency_jitter_ms: u64,
    /// Probability in `[0, 1]` that a send fails
    #[serde(default)]
    pub failure_rate: f64,
    /// Probability in `[0, 1]` that a health probe reports healthy
    #[serde(default = "default_availability")]
    pub availability: f64,
    /// Latency of a health probe (milliseconds)
    #[serde(default = "default_health_check_ms")]
    pub health_check_ms: u64,
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
}

fn default_id_prefix() -> String {
    "sim".to_string()
}

const fn default_latency_ms() -> u64 {
    100
}

const fn default_availability() -> f64 {
    1.0
}

const fn default_health_check_ms() -> u64 {
    50
}

fn default_failure_message() -> String {
    "Simulated failure".to_string()
}

impl SimulatedProviderConfig {
    /// Primary provider: slower, rarely fails
    #[must_use]
    pub fn primary() -> Self {
        Self {
            name: "MockProvider A".to_string(),
            description: "Primary email provider".to_string(),
            id_prefix: "mp_a".to_string(),
            latency_ms: 125,
            latency_jitter_ms: 50,
            failure_rate: 0.008,
            availability: 0.95,
            health_check_ms: 50,
            failure_message: "Connection timeout".to_string(),
        }
    }

    /// Fallback provider: faster, fails more often
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            name: "MockProvider B".to_string(),
            description: "Fallback email provider".to_string(),
            id_prefix: "mp_b".to_string(),
            latency_ms: 89,
            latency_jitter_ms: 30,
            failure_rate: 0.022,
            availability: 0.97,
            health_check_ms: 30,
            failure_message: "Rate limit exceeded".to_string(),
        }
    }
}

/// A provider that delivers nowhere, with configurable latency and failure rates
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    config: SimulatedProviderConfig,
}

impl SimulatedProvider {
    #[must_use]
    pub const fn new(config: SimulatedProviderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn primary() -> Self {
        Self::new(SimulatedProviderConfig::primary())
    }

    #[must_use]
    pub fn fallback() -> Self {
        Self::new(SimulatedProviderConfig::fallback())
    }

    fn send_latency(&self) -> Duration {
        let jitter = if self.config.latency_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.latency_jitter_ms)
        };
        Duration::from_millis(self.config.latency_ms + jitter)
    }

    fn roll(probability: f64) -> bool {
        probability > 0.0 && rand::rng().random_bool(probability.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl DeliveryProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    async fn send(
        &self,
        recipient: &str,
        _subject: &str,
        _body: &str,
    ) -> Result<SendReceipt, ProviderError> {
        tokio::time::sleep(self.send_latency()).await;

        if Self::roll(self.config.failure_rate) {
            tracing::debug!(provider = %self.config.name, recipient, "Simulated send failure");
            return Err(ProviderError::new(
                &self.config.name,
                format!("{} - {}", self.config.failure_message, self.config.name),
            ));
        }

        Ok(SendReceipt {
            message_id: format!("{}_{}", self.config.id_prefix, Ulid::new()),
        })
    }

    async fn is_healthy(&self) -> bool {
        tokio::time::sleep(Duration::from_millis(self.config.health_check_ms)).await;
        Self::roll(self.config.availability)
    }

    fn average_latency_ms(&self) -> u64 {
        self.config.latency_ms
    }
}
