//! Acknowledged messages are dropped from the configured store.

mod support;

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use reliant_retransmit::{
    AcknowledgementRanges, RetransmissionRegistry, RetryLimit, SequenceKey,
};
use reliant_store::TestMessageStore;
use support::{RecordingStrategy, exponential, message};

fn setup() -> (RetransmissionRegistry, TestMessageStore, SequenceKey) {
    let store = TestMessageStore::new();
    let registry = RetransmissionRegistry::new(Arc::new(RecordingStrategy::default()))
        .with_store(Arc::new(store.clone()));
    let seq = SequenceKey::from("S1");

    for number in 1..=4 {
        let outbound = message("S1", number, exponential(100, RetryLimit::Unlimited));
        store
            .inner()
            .insert(&seq, number, Arc::clone(&outbound.payload))
            .unwrap();
        registry.add_unacknowledged(outbound).unwrap();
    }

    (registry, store, seq)
}

#[tokio::test]
async fn test_purge_removes_acknowledged_records() {
    let (registry, store, seq) = setup();
    let acks: AcknowledgementRanges = [(1, 2)].into_iter().collect();

    assert_eq!(registry.purge_acknowledged(&seq, &acks).await, 2);

    store
        .wait_for_removals(1, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(store.removals(), vec![(seq.clone(), vec![1, 2])]);
    assert_eq!(store.inner().numbers(&seq), vec![3, 4]);
}

#[tokio::test]
async fn test_nothing_acknowledged_leaves_store_alone() {
    let (registry, store, seq) = setup();

    assert_eq!(registry.purge_acknowledged(&seq, &|_: u64| false).await, 0);
    assert!(store.removals().is_empty());
    assert_eq!(store.inner().len(), 4);
}

#[tokio::test]
async fn test_store_failure_does_not_fail_purge() {
    let (registry, store, seq) = setup();
    store.fail_next(1);

    assert_eq!(registry.purge_acknowledged(&seq, &|n: u64| n == 4).await, 1);
    assert_eq!(registry.unacknowledged_message_numbers(&seq), vec![1, 2, 3]);
    assert!(registry.verify_counter());

    // The record survives the failed removal.
    assert!(store.inner().contains(&seq, 4));
}
