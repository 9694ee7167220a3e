use std::fmt::Debug;

use async_trait::async_trait;
use reliant_common::{MessageNumber, SequenceKey};

/// Durable record keeping for outbound messages awaiting acknowledgment.
///
/// Implementations must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait MessageStore: Send + Sync + Debug {
    /// Drop the persisted records of `numbers` for `sequence`.
    ///
    /// Numbers with no record are ignored.
    ///
    /// # Errors
    ///
    /// If the underlying storage cannot be updated.
    async fn remove_messages(
        &self,
        sequence: &SequenceKey,
        numbers: &[MessageNumber],
    ) -> crate::Result<()>;
}
