//! Type definitions for the retry queue and the submission surface

use core::fmt::{self, Display, Formatter};

use courier_common::{Message, Priority};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ValidationError;

/// A queued message with its scheduling metadata
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub message: Message,
    /// Earliest time the entry may be dispatched
    pub scheduled_at: Instant,
    /// Set while a dispatch attempt holds the entry
    pub processing_started_at: Option<Instant>,
    /// Insertion order, last tie-break when `created_at` is equal
    pub(crate) sequence: u64,
}

impl QueueEntry {
    pub(crate) const fn new(message: Message, now: Instant, sequence: u64) -> Self {
        Self {
            message,
            scheduled_at: now,
            processing_started_at: None,
            sequence,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.message.id
    }

    #[must_use]
    pub const fn is_processing(&self) -> bool {
        self.processing_started_at.is_some()
    }

    /// Whether a dispatch at `now` may claim this entry
    #[must_use]
    pub fn is_eligible(&self, now: Instant) -> bool {
        !self.is_processing() && self.scheduled_at <= now
    }

    /// Dispatch order key: priority rank, then age, then insertion order
    pub(crate) fn dispatch_key(&self) -> (u8, chrono::DateTime<chrono::Utc>, u64) {
        (
            self.message.priority.rank(),
            self.message.created_at,
            self.sequence,
        )
    }
}

/// A message submission as received from the request layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub recipient: String,
    pub subject: String,
    /// Message body
    pub message: String,
    #[serde(default)]
    pub priority: Option<String>,
}

impl SubmitRequest {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            message: message.into(),
            priority: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Check the submission and resolve its priority
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<Priority, ValidationError> {
        let recipient = self.recipient.trim();
        if recipient.is_empty() {
            return Err(ValidationError::MissingRecipient);
        }
        if !is_plausible_address(recipient) {
            return Err(ValidationError::InvalidRecipient(recipient.to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(ValidationError::MissingSubject);
        }
        if self.message.trim().is_empty() {
            return Err(ValidationError::MissingBody);
        }

        self.priority.as_deref().map_or(Ok(Priority::Normal), |p| {
            p.parse()
                .map_err(|_| ValidationError::UnknownPriority(p.to_string()))
        })
    }
}

/// `local@domain` with a dotted domain and no whitespace
fn is_plausible_address(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }

    address.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.contains('@')
            && domain
                .split_once('.')
                .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
    })
}

/// Outcome of an accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    /// New work was created
    Queued,
    /// The idempotency key was seen before, no new work was created
    Duplicate,
}

impl Display for SubmitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Duplicate => f.write_str("duplicate"),
        }
    }
}

/// `{id, status, message}` returned to the request layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
    pub status: SubmitStatus,
    /// Human readable summary
    pub message: String,
}

impl SubmitResponse {
    pub(crate) fn queued(id: String) -> Self {
        Self {
            id,
            status: SubmitStatus::Queued,
            message: "Email queued for delivery".to_string(),
        }
    }

    pub(crate) fn duplicate(id: String) -> Self {
        Self {
            id,
            status: SubmitStatus::Duplicate,
            message: "Email already queued".to_string(),
        }
    }
}
