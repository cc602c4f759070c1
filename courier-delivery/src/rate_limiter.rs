//! Global admission control using a sliding window
//!
//! Every accepted submission records its admission time. Before each decision
//! the window is pruned of admissions older than `window_ms`; a new admission
//! is allowed only while fewer than `max_requests` remain.
//!
//! # Example
//!
//! ```text
//! Limit: 3 requests / 10s
//!
//! t=0s   admit  [0]
//! t=2s   admit  [0, 2]
//! t=4s   admit  [0, 2, 4]
//! t=5s   reject (window full, capacity frees at t=10s)
//! t=10s  admit  [2, 4, 10]   (t=0 has left the window)
//! ```

use std::{collections::VecDeque, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for the admission window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admissions allowed within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_requests() -> u32 {
    100
}

const fn default_window_ms() -> u64 {
    60_000
}

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    /// Admission times, oldest first
    admissions: parking_lot::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_millis(config.window_ms),
            admissions: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Drop admissions that have left the window
    fn prune(&self, admissions: &mut VecDeque<Instant>, now: Instant) {
        while admissions
            .front()
            .is_some_and(|admitted| now.duration_since(*admitted) >= self.window)
        {
            admissions.pop_front();
        }
    }

    /// Admit one request if the window has room, recording it
    pub fn try_admit(&self) -> bool {
        let now = Instant::now();
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);

        if admissions.len() < self.max_requests as usize {
            admissions.push_back(now);
            true
        } else {
            tracing::debug!(
                in_window = admissions.len(),
                max_requests = self.max_requests,
                "Rate limit reached, admission refused"
            );
            false
        }
    }

    /// Share of the window currently used, 0 to 100
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn usage_percentage(&self) -> u32 {
        if self.max_requests == 0 {
            return 100;
        }

        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, Instant::now());

        let usage = (admissions.len() as f64 / f64::from(self.max_requests)) * 100.0;
        usage.round().min(100.0) as u32
    }

    /// Admissions still available in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, Instant::now());

        let used = u32::try_from(admissions.len()).unwrap_or(u32::MAX);
        self.max_requests.saturating_sub(used)
    }

    /// When the oldest counted admission leaves the window, `None` if the window is empty
    #[must_use]
    pub fn reset_time(&self) -> Option<Instant> {
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, Instant::now());

        admissions.front().map(|oldest| *oldest + self.window)
    }

    /// How long until capacity frees up, zero if there is room now
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        self.reset_time()
            .map_or(Duration::ZERO, |reset| {
                reset.saturating_duration_since(Instant::now())
            })
    }

    /// Forget every recorded admission
    pub fn reset(&self) {
        self.admissions.lock().clear();
    }
}
