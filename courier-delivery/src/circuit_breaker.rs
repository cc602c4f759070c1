//! Per-provider circuit breaker to stop hammering a failing provider
//!
//! # Circuit Breaker Pattern
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, all calls pass through
//! - **Open**: Circuit tripped after consecutive failures, calls are refused immediately
//! - **Half-Open**: A single probe call is let through to test recovery
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_threshold consecutive failures  ┌──────┐
//! │ Closed  │ ───────────────────────────────────────> │ Open │ <──┐
//! └─────────┘                                          └──────┘    │
//!     ^                                                    │       │
//!     │                                                    │ open_duration elapsed
//!     │  Probe succeeds      ┌───────────────┐             │       │
//!     └──────────────────────│  Half-Open    │ <───────────┘       │
//!                            └───────────────┘                     │
//!                                    │         Probe fails         │
//!                                    └─────────────────────────────┘
//! ```
//!
//! Stale state is forgotten lazily: a closed breaker whose last failure is
//! older than `reset_duration` starts a new failure run, and an open breaker
//! nobody consulted for `reset_duration` is fully reset to closed.
//!
//! [`CircuitBreaker::execute`] is the only way provider calls are made, so a
//! failing provider sees at most one probe per `open_duration`.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::CircuitError;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed (milliseconds)
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,

    /// Idle time after which breaker state is discarded (milliseconds)
    #[serde(default = "default_reset_duration_ms")]
    pub reset_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration_ms(),
            reset_duration_ms: default_reset_duration_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_open_duration_ms() -> u64 {
    60_000
}

const fn default_reset_duration_ms() -> u64 {
    120_000
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Circuit tripped - refuse all calls immediately
    Open,
    /// Testing recovery - a single probe allowed
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a call was admitted as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct CircuitBreakerData {
    state: CircuitState,
    /// Consecutive failures in the current run
    failure_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    /// Set while the half-open probe is running
    probe_in_flight: bool,
    failure_threshold: u32,
    open_duration: Duration,
    reset_duration: Duration,
}

impl CircuitBreakerData {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            probe_in_flight: false,
            failure_threshold: config.failure_threshold.max(1),
            open_duration: Duration::from_millis(config.open_duration_ms),
            reset_duration: Duration::from_millis(config.reset_duration_ms),
        }
    }

    fn open_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .is_some_and(|opened_at| now.duration_since(opened_at) >= self.open_duration)
    }

    /// Discard state nobody touched for `reset_duration`
    fn expire_stale(&mut self, provider: &str, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                if self
                    .last_failure_at
                    .is_some_and(|at| now.duration_since(at) >= self.reset_duration)
                {
                    self.failure_count = 0;
                    self.last_failure_at = None;
                }
            }
            CircuitState::Open => {
                if self
                    .opened_at
                    .is_some_and(|at| now.duration_since(at) >= self.reset_duration)
                {
                    self.close();
                    tracing::info!(
                        provider = %provider,
                        "Circuit breaker idle past reset duration - reset to CLOSED"
                    );
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_at = None;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    fn allows_attempt(&mut self, provider: &str, now: Instant) -> bool {
        self.expire_stale(provider, now);
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.open_elapsed(now),
            CircuitState::HalfOpen => !self.probe_in_flight,
        }
    }

    fn admit(&mut self, provider: &str, now: Instant) -> Option<Admission> {
        self.expire_stale(provider, now);
        match self.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                if !self.open_elapsed(now) {
                    return None;
                }
                self.state = CircuitState::HalfOpen;
                self.failure_count = 0;
                self.probe_in_flight = true;
                tracing::info!(
                    provider = %provider,
                    "Circuit breaker entering HALF-OPEN state - testing recovery"
                );
                Some(Admission::Probe)
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    None
                } else {
                    self.probe_in_flight = true;
                    Some(Admission::Probe)
                }
            }
        }
    }

    /// Record a success, returns `true` if the circuit closed
    fn record_success(&mut self, provider: &str) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.last_failure_at = None;
                false
            }
            CircuitState::HalfOpen => {
                self.close();
                tracing::info!(
                    provider = %provider,
                    "Circuit breaker CLOSED - normal operation resumed"
                );
                true
            }
            CircuitState::Open => {
                // A call admitted before the circuit tripped finished late
                tracing::debug!(provider = %provider, "Success recorded while circuit is open");
                false
            }
        }
    }

    /// Record a failure, returns `true` if the circuit opened
    fn record_failure(&mut self, provider: &str, now: Instant) -> bool {
        self.last_failure_at = Some(now);
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    tracing::warn!(
                        provider = %provider,
                        failure_count = self.failure_count,
                        threshold = self.failure_threshold,
                        open_duration_ms = self.open_duration.as_millis(),
                        "Circuit breaker OPENED - refusing calls to provider"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count += 1;
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.probe_in_flight = false;
                tracing::warn!(
                    provider = %provider,
                    "Circuit breaker probe failed - reopening circuit"
                );
                true
            }
            CircuitState::Open => false,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Consecutive failures in the current run
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub opened_at: Option<Instant>,
}

/// Circuit breaker guarding a single provider
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    provider: Arc<str>,
    data: Arc<parking_lot::Mutex<CircuitBreakerData>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(provider: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            provider: Arc::from(provider),
            data: Arc::new(parking_lot::Mutex::new(CircuitBreakerData::new(config))),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Run `operation` through the breaker
    ///
    /// # Errors
    ///
    /// [`CircuitError::Open`] without invoking `operation` when the circuit
    /// refuses the call, otherwise the operation's own error as
    /// [`CircuitError::Inner`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.data.lock().admit(&self.provider, Instant::now());
        let Some(admission) = admission else {
            return Err(CircuitError::Open(self.provider.to_string()));
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;
        guard.armed = false;

        let mut data = self.data.lock();
        match result {
            Ok(value) => {
                data.record_success(&self.provider);
                Ok(value)
            }
            Err(err) => {
                data.record_failure(&self.provider, Instant::now());
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Whether a call made now would be let through
    ///
    /// An open circuit whose open duration has elapsed reports `true`: the
    /// next call is its half-open probe.
    #[must_use]
    pub fn allows_attempt(&self) -> bool {
        self.data
            .lock()
            .allows_attempt(&self.provider, Instant::now())
    }

    /// Current circuit state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut data = self.data.lock();
        data.expire_stale(&self.provider, Instant::now());
        data.state
    }

    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut data = self.data.lock();
        data.expire_stale(&self.provider, Instant::now());
        CircuitBreakerStats {
            state: data.state,
            failure_count: data.failure_count,
            last_failure_at: data.last_failure_at,
            opened_at: data.opened_at,
        }
    }

    /// Force the circuit closed and clear all failure tracking
    pub fn reset(&self) {
        self.data.lock().close();
    }
}

/// Releases the half-open slot if a probe is dropped before it completes
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.data.lock().probe_in_flight = false;
        }
    }
}

/// Circuit breakers for all providers, created on first use
#[derive(Debug)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, CircuitBreaker>,
}

impl CircuitBreakers {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get or create the breaker for a provider
    pub fn get(&self, provider: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.get(provider) {
            return breaker.clone();
        }

        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| CircuitBreaker::new(provider, &self.config))
            .clone()
    }

    /// State of every known breaker, sorted by provider name
    #[must_use]
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// `Open` if any breaker is open, else `HalfOpen` if any is half-open, else `Closed`
    #[must_use]
    pub fn aggregate_state(&self) -> CircuitState {
        let states = self.states();
        if states.iter().any(|(_, state)| *state == CircuitState::Open) {
            CircuitState::Open
        } else if states.iter().any(|(_, state)| *state == CircuitState::HalfOpen) {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }
}
