//! Error types for the reliant-store crate.

use reliant_common::{MessageNumber, SequenceKey};
use thiserror::Error;

/// Errors raised by [`MessageStore`](crate::MessageStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A message with this number is already stored for the sequence.
    #[error("Message {number} already stored for sequence {sequence}")]
    AlreadyExists {
        sequence: SequenceKey,
        number: MessageNumber,
    },

    /// The store refused the operation (capacity, injected failure, ...).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
