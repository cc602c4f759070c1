//! Shared types for the courier delivery pipeline
//!
//! - [`message`]: the unit of work and its lifecycle
//! - [`log`]: the append-only event feed mirrored to the store
//! - [`logging`]: tracing subscriber setup and logging macros

pub mod error;
pub mod log;
pub mod logging;
pub mod message;

pub use error::{ParseError, TransitionError};
pub use log::{LogEvent, LogLevel};
pub use message::{FailureOutcome, Message, MessageStatus, Priority};
pub use tracing;
