//! Records and partial updates exchanged with a [`MessageStore`](crate::MessageStore)

use chrono::{DateTime, NaiveDate, Utc};
use courier_common::{Message, MessageStatus};
use serde::{Deserialize, Serialize};

/// Partial update of a stored message, `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub status: Option<MessageStatus>,
    pub provider: Option<String>,
    pub retry_count: Option<u32>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MessageUpdate {
    /// Apply this update to `message` in place
    pub fn apply(&self, message: &mut Message) {
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(provider) = &self.provider {
            message.provider = Some(provider.clone());
        }
        if let Some(retry_count) = self.retry_count {
            message.retry_count = retry_count;
        }
        if let Some(sent_at) = self.sent_at {
            message.sent_at = Some(sent_at);
        }
        if let Some(failed_at) = self.failed_at {
            message.failed_at = Some(failed_at);
        }
        if let Some(last_error) = &self.last_error {
            message.last_error = Some(last_error.clone());
        }
    }
}

impl From<&Message> for MessageUpdate {
    /// Snapshot of every field the pipeline mutates after creation
    fn from(message: &Message) -> Self {
        Self {
            status: Some(message.status),
            provider: message.provider.clone(),
            retry_count: Some(message.retry_count),
            sent_at: message.sent_at,
            failed_at: message.failed_at,
            last_error: message.last_error.clone(),
        }
    }
}

/// System-wide counters shown on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub emails_sent_today: u64,
    /// Percentage of stored messages that reached `sent`
    pub success_rate: u32,
    pub queue_size: u64,
    pub rate_limit_usage: u32,
    /// UTC day `emails_sent_today` refers to
    pub day: NaiveDate,
    pub last_updated: DateTime<Utc>,
}

impl Default for SystemStats {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            emails_sent_today: 0,
            success_rate: 0,
            queue_size: 0,
            rate_limit_usage: 0,
            day: now.date_naive(),
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatsUpdate {
    pub emails_sent_today: Option<u64>,
    pub success_rate: Option<u32>,
    pub queue_size: Option<u64>,
    pub rate_limit_usage: Option<u32>,
}

/// Delivery counters for a single provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub provider: String,
    pub successes: u64,
    pub failures: u64,
    /// Running mean latency over all recorded attempt cycles
    pub avg_latency_ms: u64,
    /// Breaker state last observed for this provider
    pub circuit_state: Option<String>,
    pub last_checked: DateTime<Utc>,
}

impl ProviderStats {
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            successes: 0,
            failures: 0,
            avg_latency_ms: 0,
            circuit_state: None,
            last_checked: Utc::now(),
        }
    }

    /// Percentage of successful attempt cycles, 100 when nothing was attempted yet
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn success_rate(&self) -> u32 {
        let total = self.successes + self.failures;
        if total == 0 {
            return 100;
        }
        ((self.successes as f64 / total as f64) * 100.0).round() as u32
    }

    /// Fold one attempt cycle into the counters
    #[must_use]
    pub fn with_outcome(mut self, success: bool, latency_ms: u64) -> Self {
        let previous = self.successes + self.failures;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.avg_latency_ms = (self.avg_latency_ms * previous + latency_ms) / (previous + 1);
        self.last_checked = Utc::now();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatsUpdate {
    pub successes: Option<u64>,
    pub failures: Option<u64>,
    pub avg_latency_ms: Option<u64>,
    pub circuit_state: Option<String>,
}

impl From<&ProviderStats> for ProviderStatsUpdate {
    fn from(stats: &ProviderStats) -> Self {
        Self {
            successes: Some(stats.successes),
            failures: Some(stats.failures),
            avg_latency_ms: Some(stats.avg_latency_ms),
            circuit_state: stats.circuit_state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_common::Priority;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_update_only_touches_set_fields() {
        let mut message = Message::new("id", "a@x.com", "s", "m", Priority::Low);
        let before = message.clone();

        MessageUpdate::default().apply(&mut message);
        assert_eq!(message, before);

        MessageUpdate {
            status: Some(MessageStatus::Retry { attempt: 1, max: 3 }),
            retry_count: Some(1),
            last_error: Some("timeout".to_string()),
            ..Default::default()
        }
        .apply(&mut message);

        assert_eq!(message.status, MessageStatus::Retry { attempt: 1, max: 3 });
        assert_eq!(message.retry_count, 1);
        assert_eq!(message.last_error.as_deref(), Some("timeout"));
        assert_eq!(message.recipient, before.recipient);
    }

    #[test]
    fn test_provider_stats_outcomes() {
        let stats = ProviderStats::new("A");
        assert_eq!(stats.success_rate(), 100);

        let stats = stats
            .with_outcome(true, 100)
            .with_outcome(true, 200)
            .with_outcome(false, 300);

        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.avg_latency_ms, 200);
        assert_eq!(stats.success_rate(), 67);
    }
}
