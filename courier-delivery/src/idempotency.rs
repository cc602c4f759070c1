//! Idempotency keys seen by `submit`
//!
//! A key is recorded once the message it names has been stored, and lives in
//! memory for `ttl`, which comfortably outlasts the retry window of that
//! message. Expired keys are pruned lazily whenever a new key is recorded.
//! Two submissions racing on one key are settled by the store, which refuses
//! the second create for the same id.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug)]
pub struct IdempotencyKeys {
    ttl: Duration,
    keys: DashMap<String, Instant>,
}

impl IdempotencyKeys {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            keys: DashMap::new(),
        }
    }

    /// Remember `key` as answered, restarting its TTL
    pub fn record(&self, key: &str) {
        let now = Instant::now();
        self.prune(now);
        self.keys.insert(key.to_string(), now);
    }

    /// Whether `key` is currently live
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .is_some_and(|at| Instant::now().duration_since(*at) < self.ttl)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn prune(&self, now: Instant) {
        self.keys
            .retain(|_, recorded| now.duration_since(*recorded) < self.ttl);
    }
}
