//! Typed error handling for retransmission.
//!
//! Nothing here ever reaches the original sender of a message:
//! - [`RetransmitError`] rejects malformed input when a message is registered
//! - [`TransportError`] is reported by a resend strategy and only logged
//! - [`ScheduleError`] leaves a candidate without a timer
//! - [`ConfigError`] is raised while loading configuration

use std::{io, path::PathBuf};

use reliant_common::{MessageNumber, SequenceKey};
use thiserror::Error;

use crate::policy::PolicyError;

/// Errors returned by the registry's public operations.
#[derive(Debug, Error)]
pub enum RetransmitError {
    /// The message has an empty sequence key.
    #[error("Message {0} has no sequence")]
    MissingSequence(MessageNumber),

    /// Message numbers start at 1.
    #[error("Invalid message number {number} for sequence {sequence}")]
    InvalidMessageNumber {
        sequence: SequenceKey,
        number: MessageNumber,
    },

    /// The sequence already tracks a message with this number.
    #[error("Message {number} is already awaiting acknowledgment on sequence {sequence}")]
    DuplicateMessageNumber {
        sequence: SequenceKey,
        number: MessageNumber,
    },

    /// The message carries an unusable retry policy.
    #[error("Invalid retry policy: {0}")]
    Policy(#[from] PolicyError),

    /// No candidate exists for the sequence and number.
    #[error("No message {number} awaiting acknowledgment on sequence {sequence}")]
    UnknownMessage {
        sequence: SequenceKey,
        number: MessageNumber,
    },
}

/// Failures reported by a [`ResendStrategy`](crate::ResendStrategy).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The peer reset an established connection.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// The send did not complete in time.
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// Raw I/O failure from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the failure is expected to clear up on its own.
    ///
    /// Transient failures are routine for an unreliable transport and are
    /// only logged at debug level.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionRefused(_) | Self::ConnectionReset(_) | Self::TimedOut(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ),
            Self::Other(_) => false,
        }
    }
}

/// Failure to arm a retransmission timer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The scheduler no longer accepts tasks.
    #[error("Scheduler has been shut down")]
    Shutdown,

    /// No tokio runtime is available to run the timer.
    #[error("No tokio runtime available for retransmission timers")]
    NoRuntime,

    /// The requested instant cannot be represented.
    #[error("Retry instant out of range")]
    OutOfRange,
}

/// Errors raised while locating or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RELIANT_CONFIG points to non-existent file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("No configuration file found. Tried:\n  - RELIANT_CONFIG environment variable\n{tried}")]
    NotFound { tried: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("Invalid default retry policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("Executor '{0}' must allow at least one concurrent resend")]
    Executor(String),
}
