use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use reliant_common::{MessageNumber, SequenceKey};

use crate::{StoreError, r#trait::MessageStore};

/// A persisted outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub number: MessageNumber,
    pub payload: Arc<[u8]>,
}

/// In-memory message store.
///
/// Records are grouped per sequence and kept ordered by message number. An
/// optional capacity bounds the total number of records; inserts beyond it
/// fail rather than grow without limit.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    pub(crate) sequences: Arc<DashMap<SequenceKey, BTreeMap<MessageNumber, StoredMessage>>>,
    capacity: Option<usize>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sequences: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Persist a message.
    ///
    /// # Errors
    ///
    /// If the number is already stored for the sequence, or the store is full.
    pub fn insert(
        &self,
        sequence: &SequenceKey,
        number: MessageNumber,
        payload: Arc<[u8]>,
    ) -> crate::Result<()> {
        if let Some(capacity) = self.capacity {
            let len = self.len();
            if len >= capacity {
                return Err(StoreError::Unavailable(format!(
                    "Memory store capacity exceeded: {len}/{capacity} messages"
                )));
            }
        }

        let mut records = self.sequences.entry(sequence.clone()).or_default();
        if records.contains_key(&number) {
            return Err(StoreError::AlreadyExists {
                sequence: sequence.clone(),
                number,
            });
        }
        records.insert(number, StoredMessage { number, payload });

        Ok(())
    }

    /// Stored message numbers of a sequence, ascending.
    pub fn numbers(&self, sequence: &SequenceKey) -> Vec<MessageNumber> {
        self.sequences
            .get(sequence)
            .map(|records| records.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, sequence: &SequenceKey, number: MessageNumber) -> Option<StoredMessage> {
        self.sequences
            .get(sequence)
            .and_then(|records| records.get(&number).cloned())
    }

    pub fn contains(&self, sequence: &SequenceKey, number: MessageNumber) -> bool {
        self.sequences
            .get(sequence)
            .is_some_and(|records| records.contains_key(&number))
    }

    /// Total number of records across all sequences.
    pub fn len(&self) -> usize {
        self.sequences.iter().map(|records| records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn remove(&self, sequence: &SequenceKey, numbers: &[MessageNumber]) -> usize {
        let mut removed = 0;
        let now_empty = self.sequences.get_mut(sequence).is_some_and(|mut records| {
            for number in numbers {
                if records.remove(number).is_some() {
                    removed += 1;
                }
            }
            records.is_empty()
        });

        if now_empty {
            self.sequences
                .remove_if(sequence, |_, records| records.is_empty());
        }

        removed
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn remove_messages(
        &self,
        sequence: &SequenceKey,
        numbers: &[MessageNumber],
    ) -> crate::Result<()> {
        let removed = self.remove(sequence, numbers);
        tracing::trace!(%sequence, requested = numbers.len(), removed, "Removed stored messages");
        Ok(())
    }
}
