use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use reliant_retransmit::{OutboundMessage, ResendStrategy, SequenceKey, TransportError};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResend {
    pub sequence: SequenceKey,
    pub number: u64,
    pub request_ack: bool,
    pub at: Instant,
}

/// Strategy that records every resend instead of sending it.
///
/// The next `fail_next` resends report a non-transient failure after being
/// recorded. With a delay, each resend is recorded when it starts and
/// completes `delay` later.
#[derive(Debug, Default)]
pub struct RecordingStrategy {
    resends: Mutex<Vec<RecordedResend>>,
    failures: AtomicUsize,
    delay: Duration,
}

impl RecordingStrategy {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn resends(&self) -> Vec<RecordedResend> {
        self.resends.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.resends.lock().len()
    }

    /// Instants at which message `number` of `sequence` was resent.
    pub fn times_of(&self, sequence: &str, number: u64) -> Vec<Instant> {
        self.resends
            .lock()
            .iter()
            .filter(|r| r.sequence.as_str() == sequence && r.number == number)
            .map(|r| r.at)
            .collect()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResendStrategy for RecordingStrategy {
    async fn resend(
        &self,
        message: &OutboundMessage,
        request_ack: bool,
    ) -> Result<(), TransportError> {
        self.resends.lock().push(RecordedResend {
            sequence: message.sequence.clone(),
            number: message.number,
            request_ack,
            at: Instant::now(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Other("receiver rejected message".to_string()));
        }
        Ok(())
    }
}
