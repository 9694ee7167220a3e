use std::sync::Arc;

use reliant_common::{MessageNumber, SequenceKey};

use crate::policy::RetryPolicy;

/// Where a message is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A reachable endpoint.
    Address(String),
    /// The reply path is anonymous; there is nowhere to resend to.
    Anonymous,
}

impl Destination {
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Self::Address(value.to_string())
    }
}

/// A message that has been sent once and may be replayed.
///
/// The payload is shared; replaying it does not copy the bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub sequence: SequenceKey,
    pub number: MessageNumber,
    pub payload: Arc<[u8]>,
    pub destination: Destination,
    pub policy: RetryPolicy,
    /// Name used to select a registered executor for resends.
    pub owner: Option<String>,
}

impl OutboundMessage {
    /// A message with the default retry policy and no owner.
    pub fn new(
        sequence: impl Into<SequenceKey>,
        number: MessageNumber,
        payload: impl Into<Arc<[u8]>>,
        destination: Destination,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            number,
            payload: payload.into(),
            destination,
            policy: RetryPolicy::default(),
            owner: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::policy::RetryLimit;

    #[test]
    fn builder_sets_policy_and_owner() {
        let policy = RetryPolicy::constant(Duration::from_millis(50), RetryLimit::Limited(2));
        let message = OutboundMessage::new("S1", 1, b"payload".to_vec(), "tcp://peer".into())
            .with_policy(policy.clone())
            .with_owner("orders");

        assert_eq!(message.sequence.as_str(), "S1");
        assert_eq!(message.policy, policy);
        assert_eq!(message.owner.as_deref(), Some("orders"));
        assert_eq!(message.payload.as_ref(), b"payload");
        assert!(!message.destination.is_anonymous());
    }
}
