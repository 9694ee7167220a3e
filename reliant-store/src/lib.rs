//! Persistence hooks for unacknowledged outbound messages.
//!
//! The retransmission engine never writes messages itself; it only asks a
//! configured [`MessageStore`] to forget records once the receiver has
//! acknowledged them.

pub mod backends;
pub mod error;
pub mod r#trait;

pub use backends::{MemoryMessageStore, StoredMessage, TestMessageStore};
pub use error::{Result, StoreError};
pub use r#trait::MessageStore;
