//! Delivery log events
//!
//! These are the user-facing feed of what the pipeline did, distinct from the
//! diagnostic `tracing` output (although every event is mirrored there too).

use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Success => "success",
        }
    }

    /// The `tracing` level this event is mirrored at
    #[must_use]
    pub const fn tracing_level(self) -> tracing::Level {
        match self {
            Self::Info | Self::Success => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "success" => Ok(Self::Success),
            _ => Err(ParseError::UnknownLevel(s.to_string())),
        }
    }
}

/// A single entry in the delivery log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Sequence number assigned by the store on append (0 until then)
    #[serde(default)]
    pub id: u64,
    pub level: LogLevel,
    pub message: String,
    pub provider: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            level,
            message: message.into(),
            provider: None,
            message_id: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_correlation() {
        let event = LogEvent::new(LogLevel::Success, "delivered")
            .with_provider("MockProvider A")
            .with_message_id("msg-1");

        assert_eq!(event.id, 0);
        assert_eq!(event.provider.as_deref(), Some("MockProvider A"));
        assert_eq!(event.message_id.as_deref(), Some("msg-1"));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::Success.tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Warn.tracing_level(), tracing::Level::WARN);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("fatal".parse::<LogLevel>().is_err());
    }
}
