//! Test support for retransmission scenarios.
//!
//! Tests run on tokio's paused clock, so recorded instants are exact.

#![allow(dead_code)]

pub mod recording;

use std::{sync::Arc, time::Duration};

use reliant_retransmit::{
    Destination, OutboundMessage, RetransmissionRegistry, RetryLimit, RetryPolicy, TokioScheduler,
};

pub use recording::{RecordedResend, RecordingStrategy};

/// Registry firing through tokio timers and recording every resend.
pub fn timer_registry() -> (Arc<RetransmissionRegistry>, Arc<RecordingStrategy>) {
    reliant_common::logging::init();

    let strategy = Arc::new(RecordingStrategy::default());
    let registry = RetransmissionRegistry::with_scheduler(
        strategy.clone(),
        Arc::new(TokioScheduler::new()),
    );
    (Arc::new(registry), strategy)
}

pub fn message(sequence: &str, number: u64, policy: RetryPolicy) -> OutboundMessage {
    OutboundMessage::new(
        sequence,
        number,
        format!("message {number}").into_bytes(),
        Destination::Address("tcp://receiver:9000".to_string()),
    )
    .with_policy(policy)
}

pub fn exponential(base_ms: u64, limit: RetryLimit) -> RetryPolicy {
    RetryPolicy::exponential(Duration::from_millis(base_ms), limit)
}
