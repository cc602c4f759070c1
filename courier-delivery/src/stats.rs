//! Read-only summaries for the dashboard and the request layer
//!
//! Everything here is a query: live counters come from the queue, the rate
//! limiter and the breakers, history comes from the store. Nothing takes the
//! dispatch guard, so a slow tick never blocks a stats read.

use core::fmt::{self, Display, Formatter};
use std::sync::Arc;

use courier_common::{LogEvent, Message};
use courier_store::{MessageStore, ProviderStats, StoreError};
use serde::Serialize;

use crate::{
    circuit_breaker::{CircuitBreakers, CircuitState},
    provider::DeliveryProvider,
    queue::RetryQueue,
    rate_limiter::RateLimiter,
};

/// System-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub emails_sent_today: u64,
    /// Percentage of stored messages that were sent
    pub success_rate: u32,
    pub queue_size: usize,
    /// Queued entries not currently being dispatched
    pub pending: usize,
    /// Queued entries held by a running dispatch
    pub processing: usize,
    /// Share of the admission window in use, 0 to 100
    pub rate_limit_usage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProviderHealth {
    Healthy,
    /// The liveness probe failed; attempts are still made
    Degraded,
    /// The breaker is open and attempts are skipped
    #[serde(rename = "Circuit Open")]
    CircuitOpen,
}

impl ProviderHealth {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Degraded => "Degraded",
            Self::CircuitOpen => "Circuit Open",
        }
    }
}

impl Display for ProviderHealth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub status: ProviderHealth,
    /// e.g. `Avg: 125ms`
    pub latency: String,
    /// e.g. `98%`
    pub success_rate: String,
    pub description: String,
    pub circuit_state: CircuitState,
}

/// Composes dashboard summaries from the pipeline's shared components
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    store: Arc<dyn MessageStore>,
    queue: RetryQueue,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakers>,
    providers: Arc<[Arc<dyn DeliveryProvider>]>,
}

impl StatsAggregator {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: RetryQueue,
        rate_limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakers>,
        providers: Arc<[Arc<dyn DeliveryProvider>]>,
    ) -> Self {
        Self {
            store,
            queue,
            rate_limiter,
            breakers,
            providers,
        }
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn stats(&self) -> Result<DashboardStats, StoreError> {
        let system = self.store.get_system_stats().await?;

        Ok(DashboardStats {
            emails_sent_today: system.emails_sent_today,
            success_rate: system.success_rate,
            queue_size: self.queue.size(),
            pending: self.queue.pending_count(),
            processing: self.queue.processing_count(),
            rate_limit_usage: self.rate_limiter.usage_percentage(),
        })
    }

    /// Status of every provider, in preference order
    ///
    /// Latency and success rate come from recorded attempt cycles; a provider
    /// with no history reports its own typical latency and 100%.
    ///
    /// # Errors
    /// If the store cannot be read
    pub async fn provider_statuses(&self) -> Result<Vec<ProviderStatus>, StoreError> {
        let mut statuses = Vec::with_capacity(self.providers.len());

        for provider in self.providers.iter() {
            let name = provider.name();
            let circuit_state = self.breakers.get(name).state();
            let recorded = self.store.get_provider_stats(name).await?;

            let status = if circuit_state == CircuitState::Open {
                ProviderHealth::CircuitOpen
            } else if provider.is_healthy().await {
                ProviderHealth::Healthy
            } else {
                ProviderHealth::Degraded
            };

            let (latency_ms, success_rate) = recorded
                .as_ref()
                .filter(|stats| stats.successes + stats.failures > 0)
                .map_or_else(
                    || (provider.average_latency_ms(), 100),
                    |stats: &ProviderStats| (stats.avg_latency_ms, stats.success_rate()),
                );

            statuses.push(ProviderStatus {
                name: name.to_string(),
                status,
                latency: format!("Avg: {latency_ms}ms"),
                success_rate: format!("{success_rate}%"),
                description: provider.description().to_string(),
                circuit_state,
            });
        }

        Ok(statuses)
    }

    /// Worst state across all breakers
    pub fn circuit_breaker_status(&self) -> CircuitState {
        self.breakers.aggregate_state()
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.store.list_recent_messages(limit).await
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<LogEvent>, StoreError> {
        self.store.list_recent_logs(limit).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use courier_common::Priority;
    use courier_store::{MemoryStore, ProviderStatsUpdate};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        circuit_breaker::CircuitBreakerConfig,
        provider::TestProvider,
        rate_limiter::RateLimitConfig,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: RetryQueue,
        breakers: Arc<CircuitBreakers>,
        degraded: TestProvider,
        aggregator: StatsAggregator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = RetryQueue::new();
        let rate_limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            max_requests: 4,
            window_ms: 60_000,
        }));
        let breakers = Arc::new(CircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        }));
        let degraded = TestProvider::succeeding("B").with_latency(Duration::from_millis(89));
        let providers: Arc<[Arc<dyn DeliveryProvider>]> = vec![
            Arc::new(TestProvider::succeeding("A")) as Arc<dyn DeliveryProvider>,
            Arc::new(degraded.clone()),
            Arc::new(TestProvider::succeeding("C")),
        ]
        .into();

        rate_limiter.try_admit();
        let aggregator = StatsAggregator::new(
            store.clone(),
            queue.clone(),
            rate_limiter,
            Arc::clone(&breakers),
            providers,
        );

        Fixture {
            store,
            queue,
            breakers,
            degraded,
            aggregator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_combine_live_and_stored_counters() {
        let fixture = fixture();
        for id in ["a", "b"] {
            fixture
                .queue
                .enqueue(Message::new(id, "a@x.com", "s", "m", Priority::Normal));
        }
        fixture.queue.dequeue_next().unwrap();

        let stats = fixture.aggregator.stats().await.unwrap();
        assert_eq!(
            stats,
            DashboardStats {
                emails_sent_today: 0,
                success_rate: 0,
                queue_size: 2,
                pending: 1,
                processing: 1,
                rate_limit_usage: 25,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_statuses() {
        let fixture = fixture();
        fixture.degraded.set_healthy(false);

        let breaker = fixture.breakers.get("C");
        let _ = breaker
            .execute(|| async { Err::<(), _>("boom") })
            .await;

        fixture
            .store
            .update_provider_stats(
                "A",
                &ProviderStatsUpdate {
                    successes: Some(49),
                    failures: Some(1),
                    avg_latency_ms: Some(130),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let statuses = fixture.aggregator.provider_statuses().await.unwrap();
        let summary: Vec<_> = statuses
            .iter()
            .map(|s| {
                (
                    s.name.as_str(),
                    s.status.as_str(),
                    s.latency.as_str(),
                    s.success_rate.as_str(),
                )
            })
            .collect();

        assert_eq!(
            summary,
            vec![
                ("A", "Healthy", "Avg: 130ms", "98%"),
                ("B", "Degraded", "Avg: 89ms", "100%"),
                ("C", "Circuit Open", "Avg: 0ms", "100%"),
            ]
        );
        assert_eq!(statuses[2].circuit_state, CircuitState::Open);
        assert_eq!(statuses[0].description, "Scripted test provider");
        assert_eq!(fixture.aggregator.circuit_breaker_status(), CircuitState::Open);
    }

    #[test]
    fn test_health_serializes_as_label() {
        assert_eq!(
            serde_json::to_value(ProviderHealth::CircuitOpen).unwrap(),
            serde_json::json!("Circuit Open")
        );
        assert_eq!(ProviderHealth::Degraded.to_string(), "Degraded");
    }
}
