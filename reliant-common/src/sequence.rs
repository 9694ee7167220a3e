use std::{borrow::Borrow, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Number of a message within its sequence. Numbering starts at 1.
pub type MessageNumber = u64;

/// Opaque identifier of a logical, ordered channel between a sender and a
/// receiver.
///
/// Cloning is cheap; the identifier is shared rather than copied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceKey(Arc<str>);

impl SequenceKey {
    #[must_use]
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty key does not name any sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SequenceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for SequenceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SequenceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
