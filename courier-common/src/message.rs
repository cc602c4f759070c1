//! The outbound message and its delivery lifecycle
//!
//! ```text
//! pending ──> retry 1/3 ──> retry 2/3 ──> failed
//!    │            │             │
//!    └────────────┴─────────────┴──────> sent
//! ```
//!
//! `sent` and `failed` are terminal: `sent_at` and `failed_at` are written once,
//! on the transition into them, and never both.

use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, TransitionError};

/// Default number of orchestrator-level attempts before a message fails
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Dispatch priority. Ordering follows dispatch rank: `High < Normal < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Rank used by the queue, lower dispatches first
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(ParseError::UnknownPriority(s.to_string())),
        }
    }
}

/// Delivery status of a message
///
/// Serialized in its display form (`pending`, `retry 2/3`, `sent`, `failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MessageStatus {
    /// Accepted and waiting for its first dispatch
    Pending,
    /// Waiting for a scheduled re-attempt
    Retry { attempt: u32, max: u32 },
    /// Delivered by a provider
    Sent,
    /// Gave up after exhausting retries
    Failed,
}

impl MessageStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl Display for MessageStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Retry { attempt, max } => write!(f, "retry {attempt}/{max}"),
            Self::Sent => f.write_str("sent"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => other
                .strip_prefix("retry ")
                .and_then(|counts| counts.split_once('/'))
                .and_then(|(attempt, max)| Some((attempt.parse().ok()?, max.parse().ok()?)))
                .map(|(attempt, max)| Self::Retry { attempt, max })
                .ok_or_else(|| ParseError::UnknownStatus(s.to_string())),
        }
    }
}

impl From<MessageStatus> for String {
    fn from(status: MessageStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for MessageStatus {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What a recorded failure did to the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The message will be attempted again; carries the new retry count
    Retry(u32),
    /// The retry ceiling was reached and the message is now `failed`
    Exhausted,
}

/// An outbound message, the unit of work of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique identifier, doubles as the idempotency key when one was supplied
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub status: MessageStatus,
    /// Provider that delivered the message, set on `sent`
    pub provider: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Message {
    /// Create a new `pending` message
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            priority,
            status: MessageStatus::Pending,
            provider: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    /// Override the retry ceiling; only meaningful before the first dispatch
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Transition to `sent`
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the message is already terminal.
    pub fn mark_sent(
        &mut self,
        provider: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_not_terminal()?;

        self.status = MessageStatus::Sent;
        self.provider = Some(provider.into());
        self.sent_at = Some(at);
        Ok(())
    }

    /// Count a failed attempt cycle
    ///
    /// Moves the message to `retry n/max`, or to `failed` once `retry_count`
    /// reaches `max_retries`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the message is already terminal.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<FailureOutcome, TransitionError> {
        self.ensure_not_terminal()?;

        self.retry_count = self.retry_count.saturating_add(1).min(self.max_retries);
        self.last_error = Some(error.into());

        if self.retry_count >= self.max_retries {
            self.status = MessageStatus::Failed;
            self.failed_at = Some(at);
            Ok(FailureOutcome::Exhausted)
        } else {
            self.status = MessageStatus::Retry {
                attempt: self.retry_count,
                max: self.max_retries,
            };
            Ok(FailureOutcome::Retry(self.retry_count))
        }
    }

    fn ensure_not_terminal(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}
