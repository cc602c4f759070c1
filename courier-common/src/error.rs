//! Error types for the courier-common crate.

use thiserror::Error;

use crate::message::MessageStatus;

/// Errors produced when parsing model values from their string form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The priority was not one of `high`, `normal` or `low`.
    #[error("Unknown priority: {0}")]
    UnknownPriority(String),

    /// The status string could not be understood.
    #[error("Unknown message status: {0}")]
    UnknownStatus(String),

    /// The log level was not one of `info`, `warn`, `error` or `success`.
    #[error("Unknown log level: {0}")]
    UnknownLevel(String),
}

/// A lifecycle transition was requested on a message that already reached a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Message {id} is already {status}")]
pub struct TransitionError {
    pub id: String,
    pub status: MessageStatus,
}
