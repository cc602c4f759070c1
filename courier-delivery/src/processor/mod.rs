//! Delivery orchestration
//!
//! ```text
//! submit ─> idempotency ─> rate limit ─> store ─> queue
//!                                                   │
//! tick (every dispatch_interval_ms) <───────────────┘
//!   ├─> provider 1 ─(breaker)─> send_with_retry ─┐
//!   ├─> provider 2 ─(breaker)─> send_with_retry ─┤ first success wins
//!   └─> ...                                      │
//!   ├─ success ─> sent, removed from queue <─────┘
//!   └─ failure ─> retry n/max, re-queued with backoff
//!                 or failed, removed from queue
//! ```
//!
//! Every transition is written to the store and to the delivery log. Store
//! failures are logged and never undo a transition already made in memory.

pub mod dispatch;
pub mod submit;

use std::{sync::Arc, time::Duration};

use courier_common::{LogEvent, LogLevel, Message, internal};
use courier_store::{MessageStore, StoreError, SystemStatsUpdate};
use serde::Deserialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use self::dispatch::TickOutcome;
use crate::{
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakers, CircuitState},
    idempotency::IdempotencyKeys,
    policy::RetryPolicy,
    provider::DeliveryProvider,
    queue::RetryQueue,
    rate_limiter::{RateLimitConfig, RateLimiter},
    stats::{DashboardStats, ProviderStatus, StatsAggregator},
};

const fn default_dispatch_interval_ms() -> u64 {
    1_000
}

const fn default_idempotency_ttl_secs() -> u64 {
    86_400 // 24 hours
}

/// Tunables of the delivery pipeline
///
/// ```ron
/// delivery: (
///     dispatch_interval_ms: 1000,
///     idempotency_ttl_secs: 86400,
///     rate_limit: (max_requests: 100, window_ms: 60000),
///     circuit_breaker: (failure_threshold: 5, open_duration_ms: 60000),
///     retry: (max_retries: 3, provider_attempts: 3),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// How often the dispatch loop runs (milliseconds)
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// How long an idempotency key is remembered (seconds)
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }
}

/// Running dispatch task started by [`DeliveryOrchestrator::start`]
#[derive(Debug)]
struct Worker {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Ties queue, breakers, rate limiter and providers into the delivery loop
#[derive(Debug)]
pub struct DeliveryOrchestrator {
    config: DeliveryConfig,
    store: Arc<dyn MessageStore>,
    providers: Arc<[Arc<dyn DeliveryProvider>]>,
    breakers: Arc<CircuitBreakers>,
    rate_limiter: Arc<RateLimiter>,
    queue: RetryQueue,
    idempotency: IdempotencyKeys,
    aggregator: StatsAggregator,
    /// Held for the duration of a tick, so ticks never overlap
    tick_guard: tokio::sync::Mutex<()>,
    worker: parking_lot::Mutex<Option<Worker>>,
}

impl DeliveryOrchestrator {
    /// Create an orchestrator over `providers`, tried in the given order
    #[must_use]
    pub fn new(
        config: DeliveryConfig,
        store: Arc<dyn MessageStore>,
        providers: Vec<Arc<dyn DeliveryProvider>>,
    ) -> Self {
        let providers: Arc<[Arc<dyn DeliveryProvider>]> = providers.into();
        let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker.clone()));
        for provider in providers.iter() {
            breakers.get(provider.name());
        }

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let queue = RetryQueue::new();
        let aggregator = StatsAggregator::new(
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&rate_limiter),
            Arc::clone(&breakers),
            Arc::clone(&providers),
        );

        Self {
            idempotency: IdempotencyKeys::new(Duration::from_secs(config.idempotency_ttl_secs)),
            config,
            store,
            providers,
            breakers,
            rate_limiter,
            queue,
            aggregator,
            tick_guard: tokio::sync::Mutex::new(()),
            worker: parking_lot::Mutex::new(None),
        }
    }

    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn providers(&self) -> &[Arc<dyn DeliveryProvider>] {
        &self.providers
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub const fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub const fn aggregator(&self) -> &StatsAggregator {
        &self.aggregator
    }

    /// Run the dispatch loop until `shutdown` is cancelled
    ///
    /// A tick in progress when shutdown is requested runs to completion;
    /// sends are never cancelled midway.
    pub async fn serve(&self, shutdown: CancellationToken) {
        let names = self.provider_names();
        internal!("Delivery orchestrator starting with providers: {names}");
        self.log(LogEvent::new(
            LogLevel::Info,
            format!("Delivery orchestrator started with providers: {names}"),
        ))
        .await;

        let mut ticker = tokio::time::interval(self.config.dispatch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick to avoid immediate execution
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    internal!("Delivery orchestrator received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        internal!("Delivery orchestrator shutdown complete");
    }

    /// Spawn the dispatch loop, returns `false` if it is already running
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return false;
        }

        let shutdown = CancellationToken::new();
        let orchestrator = Arc::clone(self);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { orchestrator.serve(token).await });

        *worker = Some(Worker { shutdown, handle });
        true
    }

    /// Stop the dispatch loop started by [`Self::start`] and wait for it to exit
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };

        worker.shutdown.cancel();
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Delivery orchestrator task ended abnormally");
        }
    }

    /// Whether the background loop is alive
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Dashboard counters
    ///
    /// # Errors
    /// If the store cannot be read
    pub async fn stats(&self) -> Result<DashboardStats, StoreError> {
        self.aggregator.stats().await
    }

    /// Per-provider status summaries, in preference order
    ///
    /// # Errors
    /// If the store cannot be read
    pub async fn provider_statuses(&self) -> Result<Vec<ProviderStatus>, StoreError> {
        self.aggregator.provider_statuses().await
    }

    pub fn circuit_breaker_status(&self) -> CircuitState {
        self.aggregator.circuit_breaker_status()
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.aggregator.recent_messages(limit).await
    }

    /// # Errors
    /// If the store cannot be read
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<LogEvent>, StoreError> {
        self.aggregator.recent_logs(limit).await
    }

    fn provider_names(&self) -> String {
        self.providers
            .iter()
            .map(|provider| provider.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Emit a delivery log event to `tracing` and append it to the store
    pub(crate) async fn log(&self, event: LogEvent) {
        let provider = event.provider.as_deref();
        let message_id = event.message_id.as_deref();
        match event.level {
            LogLevel::Error => error!(provider, message_id, "{}", event.message),
            LogLevel::Warn => warn!(provider, message_id, "{}", event.message),
            LogLevel::Info | LogLevel::Success => {
                info!(provider, message_id, kind = %event.level, "{}", event.message);
            }
        }

        if let Err(e) = self.store.append_log(event).await {
            warn!(error = %e, "Failed to append delivery log event");
        }
    }

    /// Write the full message state, logging instead of failing
    pub(crate) async fn persist(&self, message: &Message) {
        if let Err(e) = self
            .store
            .update_message(&message.id, &courier_store::MessageUpdate::from(message))
            .await
        {
            warn!(
                message_id = %message.id,
                status = %message.status,
                error = %e,
                "Failed to persist message state"
            );
        }
    }

    /// Mirror queue size and rate-limit usage into the store's system stats
    pub(crate) async fn sync_system_stats(&self) {
        let update = SystemStatsUpdate {
            queue_size: Some(self.queue.size() as u64),
            rate_limit_usage: Some(self.rate_limiter.usage_percentage()),
            ..Default::default()
        };

        if let Err(e) = self.store.update_system_stats(&update).await {
            warn!(error = %e, "Failed to update system stats");
        }
    }
}
