//! Sequence-keyed collection of messages awaiting acknowledgment.

use std::{collections::BTreeMap, sync::Arc};

use ahash::AHashMap;
use parking_lot::Mutex;
use reliant_common::{MessageNumber, SequenceKey, Signal, internal};
use reliant_store::MessageStore;
use reliant_tracing::traced;
use tokio::time::Instant;

use crate::{
    ack::AcknowledgementState,
    binding::Engine,
    candidate::{ResendCandidate, RetryStatus},
    error::RetransmitError,
    executor::{ExecutionPolicy, ResendJob},
    message::OutboundMessage,
    scheduler::DelayedTaskScheduler,
    strategy::ResendStrategy,
};

type CandidateList = Vec<Arc<ResendCandidate>>;

#[derive(Debug, Default)]
struct Candidates {
    active: AHashMap<SequenceKey, CandidateList>,
    /// A present key marks the sequence suspended, even with no candidates.
    suspended: AHashMap<SequenceKey, CandidateList>,
    unacknowledged: usize,
}

impl Candidates {
    fn lists<'a>(
        &'a self,
        sequence: &SequenceKey,
    ) -> impl Iterator<Item = &'a Arc<ResendCandidate>> {
        self.active
            .get(sequence)
            .into_iter()
            .chain(self.suspended.get(sequence))
            .flatten()
    }

    fn find(&self, sequence: &SequenceKey, number: MessageNumber) -> Option<Arc<ResendCandidate>> {
        self.lists(sequence)
            .find(|candidate| candidate.number() == number)
            .cloned()
    }

    fn count(&self, sequence: &SequenceKey) -> usize {
        self.active.get(sequence).map_or(0, Vec::len)
            + self.suspended.get(sequence).map_or(0, Vec::len)
    }
}

/// Tracks every unacknowledged message and drives its retransmission.
///
/// Membership changes happen under one mutex; each candidate additionally
/// guards its own retry state. Operations on unknown sequences are no-ops.
#[derive(Debug)]
pub struct RetransmissionRegistry {
    engine: Arc<Engine>,
    candidates: Mutex<Candidates>,
    store: Option<Arc<dyn MessageStore>>,
}

impl RetransmissionRegistry {
    /// A registry in manual mode: candidates never fire on their own and are
    /// driven with [`drive_due`](Self::drive_due) or
    /// [`attempt_now`](Self::attempt_now).
    pub fn new(strategy: Arc<dyn ResendStrategy>) -> Self {
        Self {
            engine: Arc::new(Engine::new(strategy)),
            candidates: Mutex::default(),
            store: None,
        }
    }

    /// A registry whose candidates fire through `scheduler`.
    pub fn with_scheduler(
        strategy: Arc<dyn ResendStrategy>,
        scheduler: Arc<dyn DelayedTaskScheduler>,
    ) -> Self {
        let mut engine = Engine::new(strategy);
        engine.set_scheduler(Some(scheduler));
        Self {
            engine: Arc::new(engine),
            candidates: Mutex::default(),
            store: None,
        }
    }

    /// Route resends through `executors`. Only affects candidates added
    /// afterwards.
    #[must_use]
    pub fn with_executors(mut self, executors: ExecutionPolicy) -> Self {
        let mut engine = Engine::clone(&self.engine);
        engine.set_executors(executors);
        self.engine = Arc::new(engine);
        self
    }

    /// Drop persisted records through `store` once acknowledged.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether candidates are only driven by the caller.
    pub fn is_manual(&self) -> bool {
        self.engine.is_manual()
    }

    /// Start tracking a sent message.
    ///
    /// The first resend is due one base interval from now, unless the
    /// sequence is suspended, in which case the candidate waits for
    /// [`resume`](Self::resume).
    ///
    /// # Errors
    ///
    /// If the sequence key is empty, the message number is 0 or already
    /// tracked for the sequence, or the retry policy is invalid.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(sequence = %message.sequence, number = message.number)))]
    pub fn add_unacknowledged(
        &self,
        message: OutboundMessage,
    ) -> Result<Arc<ResendCandidate>, RetransmitError> {
        if message.sequence.is_empty() {
            return Err(RetransmitError::MissingSequence(message.number));
        }
        if message.number == 0 {
            return Err(RetransmitError::InvalidMessageNumber {
                sequence: message.sequence,
                number: message.number,
            });
        }
        message.policy.validate()?;

        let mut candidates = self.candidates.lock();
        if candidates.find(&message.sequence, message.number).is_some() {
            return Err(RetransmitError::DuplicateMessageNumber {
                sequence: message.sequence,
                number: message.number,
            });
        }

        let sequence = message.sequence.clone();
        let suspended = candidates.suspended.contains_key(&sequence);
        let candidate = ResendCandidate::start(message, Arc::clone(&self.engine), suspended);

        let list = if suspended {
            candidates.suspended.entry(sequence).or_default()
        } else {
            candidates.active.entry(sequence).or_default()
        };
        list.push(Arc::clone(&candidate));
        candidates.unacknowledged += 1;

        Ok(candidate)
    }

    /// Messages of `sequence` awaiting acknowledgment, active or suspended.
    pub fn count_unacknowledged(&self, sequence: &SequenceKey) -> usize {
        self.candidates.lock().count(sequence)
    }

    /// Messages awaiting acknowledgment across all sequences.
    pub fn count_all_unacknowledged(&self) -> usize {
        self.candidates.lock().unacknowledged
    }

    /// Recompute the global count from the candidate lists and compare it
    /// with the maintained counter.
    pub fn verify_counter(&self) -> bool {
        let candidates = self.candidates.lock();
        let actual: usize = candidates
            .active
            .values()
            .chain(candidates.suspended.values())
            .map(Vec::len)
            .sum();

        if actual != candidates.unacknowledged {
            tracing::error!(
                counted = candidates.unacknowledged,
                actual,
                "Unacknowledged message counter out of sync"
            );
        }
        actual == candidates.unacknowledged
    }

    pub fn is_empty(&self) -> bool {
        self.count_all_unacknowledged() == 0
    }

    /// Sequences with at least one message awaiting acknowledgment, sorted.
    pub fn sequences(&self) -> Vec<SequenceKey> {
        let candidates = self.candidates.lock();
        let mut sequences: Vec<SequenceKey> = candidates
            .active
            .iter()
            .chain(candidates.suspended.iter())
            .filter(|(_, list)| !list.is_empty())
            .map(|(sequence, _)| sequence.clone())
            .collect();
        sequences.sort();
        sequences.dedup();
        sequences
    }

    /// Stop retransmitting every message of `sequence` that `acks` reports
    /// as acknowledged and forget it. Returns the number removed.
    ///
    /// The configured store is asked to drop the removed records; a store
    /// failure is logged and does not affect the result.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(sequence = %sequence)))]
    pub async fn purge_acknowledged<A>(&self, sequence: &SequenceKey, acks: &A) -> usize
    where
        A: AcknowledgementState + ?Sized,
    {
        let mut purged: Vec<MessageNumber> = Vec::new();

        {
            let mut guard = self.candidates.lock();
            let Candidates {
                active,
                suspended,
                unacknowledged,
            } = &mut *guard;

            for list in [active.get_mut(sequence), suspended.get_mut(sequence)]
                .into_iter()
                .flatten()
            {
                list.retain(|candidate| {
                    if acks.is_acknowledged(candidate.number()) {
                        candidate.resolved();
                        purged.push(candidate.number());
                        false
                    } else {
                        true
                    }
                });
            }

            if active.get(sequence).is_some_and(Vec::is_empty) {
                active.remove(sequence);
            }
            *unacknowledged -= purged.len();
        }

        if purged.is_empty() {
            return 0;
        }

        purged.sort_unstable();
        tracing::debug!(%sequence, count = purged.len(), "Purged acknowledged messages");

        if let Some(store) = &self.store {
            if let Err(e) = store.remove_messages(sequence, &purged).await {
                tracing::error!(
                    %sequence,
                    error = %e,
                    "Failed to remove acknowledged messages from store"
                );
            }
        }

        purged.len()
    }

    /// Forcibly forget every message of `sequence`, cancelling their timers
    /// and clearing any suspension. Returns the number removed.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(sequence = %sequence)))]
    pub fn purge_all(&self, sequence: &SequenceKey) -> usize {
        let mut candidates = self.candidates.lock();

        let removed: CandidateList = candidates
            .active
            .remove(sequence)
            .into_iter()
            .chain(candidates.suspended.remove(sequence))
            .flatten()
            .collect();

        for candidate in &removed {
            candidate.cancel();
        }
        candidates.unacknowledged -= removed.len();

        if !removed.is_empty() {
            internal!("Purged {} messages of sequence {}", removed.len(), sequence);
        }
        removed.len()
    }

    /// Cancel every timer of `sequence` without forgetting its messages.
    ///
    /// The messages still count as unacknowledged until purged.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(sequence = %sequence)))]
    pub fn stop(&self, sequence: &SequenceKey) {
        let candidates = self.candidates.lock();
        for candidate in candidates.lists(sequence) {
            candidate.cancel();
        }
    }

    /// Pause retransmission for `sequence`.
    ///
    /// Messages added to the sequence while it is suspended start suspended.
    /// The suspension is recorded even when the sequence has no messages yet,
    /// and it outlives the acknowledgment of every message: only
    /// [`resume`](Self::resume) or [`purge_all`](Self::purge_all) clear it.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(sequence = %sequence)))]
    pub fn suspend(&self, sequence: &SequenceKey) {
        let mut candidates = self.candidates.lock();

        let moved = candidates.active.remove(sequence).unwrap_or_default();
        for candidate in &moved {
            candidate.suspend();
        }

        let count = moved.len();
        candidates
            .suspended
            .entry(sequence.clone())
            .or_default()
            .extend(moved);

        internal!(level = DEBUG, "Suspended sequence {} ({} messages)", sequence, count);
    }

    /// Resume retransmission for `sequence`; every suspended message is
    /// retried immediately.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(sequence = %sequence)))]
    pub fn resume(&self, sequence: &SequenceKey) {
        let mut candidates = self.candidates.lock();

        let Some(moved) = candidates.suspended.remove(sequence) else {
            return;
        };
        for candidate in &moved {
            candidate.resume();
        }

        let count = moved.len();
        if !moved.is_empty() {
            candidates
                .active
                .entry(sequence.clone())
                .or_default()
                .extend(moved);
        }

        internal!(level = DEBUG, "Resumed sequence {} ({} messages)", sequence, count);
    }

    pub fn is_suspended(&self, sequence: &SequenceKey) -> bool {
        self.candidates.lock().suspended.contains_key(sequence)
    }

    /// Numbers of the messages of `sequence` awaiting acknowledgment,
    /// ascending.
    pub fn unacknowledged_message_numbers(&self, sequence: &SequenceKey) -> Vec<MessageNumber> {
        let mut numbers: Vec<MessageNumber> = self
            .candidates
            .lock()
            .lists(sequence)
            .map(|candidate| candidate.number())
            .collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn retransmission_status(
        &self,
        sequence: &SequenceKey,
        number: MessageNumber,
    ) -> Option<RetryStatus> {
        self.candidates
            .lock()
            .find(sequence, number)
            .map(|candidate| candidate.status())
    }

    pub fn retransmission_statuses(
        &self,
        sequence: &SequenceKey,
    ) -> BTreeMap<MessageNumber, RetryStatus> {
        self.candidates
            .lock()
            .lists(sequence)
            .map(|candidate| (candidate.number(), candidate.status()))
            .collect()
    }

    /// Attempt every active message whose next retry is due at `now`.
    ///
    /// Returns the number of resends started. Resends handed to a pooled
    /// executor may still be running when this returns.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn drive_due(&self, now: Instant) -> usize {
        let jobs: Vec<(Arc<ResendCandidate>, ResendJob)> = {
            let candidates = self.candidates.lock();
            candidates
                .active
                .values()
                .flatten()
                .filter_map(|candidate| {
                    candidate
                        .fire(None, Some(now))
                        .map(|job| (Arc::clone(candidate), job))
                })
                .collect()
        };

        let count = jobs.len();
        for (candidate, job) in jobs {
            self.engine.execute(candidate.owner(), job).await;
        }
        count
    }

    /// Attempt one message right away, regardless of its schedule.
    ///
    /// Returns `false` when the message is suspended, exhausted, already
    /// being resent or has nowhere to be resent to.
    ///
    /// # Errors
    ///
    /// If no such message awaits acknowledgment.
    pub async fn attempt_now(
        &self,
        sequence: &SequenceKey,
        number: MessageNumber,
    ) -> Result<bool, RetransmitError> {
        let candidate = self.candidates.lock().find(sequence, number).ok_or_else(|| {
            RetransmitError::UnknownMessage {
                sequence: sequence.clone(),
                number,
            }
        })?;

        let Some(job) = candidate.fire(None, None) else {
            return Ok(false);
        };
        self.engine.execute(candidate.owner(), job).await;
        Ok(true)
    }

    /// Cancel every timer. Unacknowledged messages stay registered so an
    /// acknowledgment arriving during shutdown still purges them.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub fn shutdown(&self) {
        let candidates = self.candidates.lock();
        for candidate in candidates
            .active
            .values()
            .chain(candidates.suspended.values())
            .flatten()
        {
            candidate.cancel();
        }

        internal!(
            level = INFO,
            "Retransmission stopped with {} unacknowledged messages",
            candidates.unacknowledged
        );
    }

    /// Run until a shutdown signal is received, then [`shutdown`](Self::shutdown).
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(&self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) {
        internal!("Retransmission registry serving");

        match shutdown.recv().await {
            Ok(Signal::Shutdown | Signal::Finalised) => {
                internal!("Retransmission registry received shutdown signal");
            }
            Err(e) => {
                tracing::error!("Retransmission registry shutdown channel error: {e}");
            }
        }

        self.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ack::AcknowledgementRanges,
        candidate::Phase,
        error::TransportError,
        policy::{RetryLimit, RetryPolicy},
    };

    struct Discard;

    #[async_trait]
    impl ResendStrategy for Discard {
        async fn resend(&self, _: &OutboundMessage, _: bool) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn registry() -> RetransmissionRegistry {
        RetransmissionRegistry::new(Arc::new(Discard))
    }

    fn message(sequence: &str, number: MessageNumber) -> OutboundMessage {
        OutboundMessage::new(sequence, number, b"m".to_vec(), "tcp://peer".into()).with_policy(
            RetryPolicy::exponential(Duration::from_millis(100), RetryLimit::Unlimited),
        )
    }

    #[tokio::test]
    async fn rejects_malformed_messages() {
        let registry = registry();

        assert!(matches!(
            registry.add_unacknowledged(message("", 1)),
            Err(RetransmitError::MissingSequence(1))
        ));
        assert!(matches!(
            registry.add_unacknowledged(message("S1", 0)),
            Err(RetransmitError::InvalidMessageNumber { number: 0, .. })
        ));

        registry.add_unacknowledged(message("S1", 1)).unwrap();
        assert!(matches!(
            registry.add_unacknowledged(message("S1", 1)),
            Err(RetransmitError::DuplicateMessageNumber { number: 1, .. })
        ));

        let mut bad_policy = message("S1", 2);
        bad_policy.policy.backoff = 0.5;
        assert!(matches!(
            registry.add_unacknowledged(bad_policy),
            Err(RetransmitError::Policy(_))
        ));

        assert_eq!(registry.count_all_unacknowledged(), 1);
        assert!(registry.verify_counter());
    }

    #[tokio::test]
    async fn purge_removes_only_acknowledged() {
        let registry = registry();
        let seq = SequenceKey::from("S1");
        for number in 1..=5 {
            registry.add_unacknowledged(message("S1", number)).unwrap();
        }
        registry.add_unacknowledged(message("S2", 1)).unwrap();

        let acks: AcknowledgementRanges = [(1, 2), (4, 4)].into_iter().collect();
        assert_eq!(registry.purge_acknowledged(&seq, &acks).await, 3);

        assert_eq!(registry.unacknowledged_message_numbers(&seq), vec![3, 5]);
        assert_eq!(registry.count_unacknowledged(&seq), 2);
        assert_eq!(registry.count_all_unacknowledged(), 3);
        assert!(registry.verify_counter());

        // Nothing left to purge for these numbers.
        assert_eq!(registry.purge_acknowledged(&seq, &acks).await, 0);
    }

    #[tokio::test]
    async fn purged_candidate_is_resolved() {
        let registry = registry();
        let seq = SequenceKey::from("S1");
        let candidate = registry.add_unacknowledged(message("S1", 1)).unwrap();

        registry.purge_acknowledged(&seq, &|_: MessageNumber| true).await;

        assert_eq!(candidate.phase(), Phase::Resolved);
        assert!(registry.is_empty());
        assert!(registry.sequences().is_empty());
    }

    #[tokio::test]
    async fn suspend_marks_sequence_for_new_messages() {
        let registry = registry();
        let seq = SequenceKey::from("S1");

        registry.suspend(&seq);
        assert!(registry.is_suspended(&seq));

        let candidate = registry.add_unacknowledged(message("S1", 1)).unwrap();
        assert_eq!(candidate.phase(), Phase::Suspended);
        assert_eq!(registry.count_unacknowledged(&seq), 1);

        registry.resume(&seq);
        assert!(!registry.is_suspended(&seq));
        assert!(!candidate.is_suspended());
        assert_eq!(registry.count_unacknowledged(&seq), 1);
    }

    #[tokio::test]
    async fn suspend_and_resume_unknown_sequence_are_noops() {
        let registry = registry();
        let seq = SequenceKey::from("nothing");

        registry.resume(&seq);
        registry.suspend(&seq);
        registry.resume(&seq);

        assert!(registry.is_empty());
        assert!(registry.sequences().is_empty());
        assert!(registry.verify_counter());
    }

    #[tokio::test]
    async fn suspension_outlives_acknowledgment() {
        let registry = registry();
        let seq = SequenceKey::from("S9");

        registry.suspend(&seq);
        let first = registry.add_unacknowledged(message("S9", 1)).unwrap();
        assert_eq!(first.phase(), Phase::Suspended);

        registry.purge_acknowledged(&seq, &|_: MessageNumber| true).await;
        assert!(registry.is_empty());
        assert!(registry.is_suspended(&seq));

        let second = registry.add_unacknowledged(message("S9", 2)).unwrap();
        assert_eq!(second.phase(), Phase::Suspended);

        registry.resume(&seq);
        assert!(!registry.is_suspended(&seq));
        assert!(!second.is_suspended());
        assert!(registry.verify_counter());
    }

    #[tokio::test]
    async fn purge_all_clears_suspension() {
        let registry = registry();
        let seq = SequenceKey::from("S1");
        registry.add_unacknowledged(message("S1", 1)).unwrap();
        registry.suspend(&seq);
        registry.add_unacknowledged(message("S1", 2)).unwrap();

        assert_eq!(registry.purge_all(&seq), 2);
        assert!(!registry.is_suspended(&seq));
        assert_eq!(registry.count_all_unacknowledged(), 0);
        assert!(registry.verify_counter());
    }

    #[tokio::test]
    async fn stop_keeps_candidates() {
        let registry = registry();
        let seq = SequenceKey::from("S1");
        let candidate = registry.add_unacknowledged(message("S1", 1)).unwrap();

        registry.stop(&seq);
        assert_eq!(candidate.phase(), Phase::Cancelled);
        assert_eq!(registry.count_unacknowledged(&seq), 1);
        assert!(!registry.attempt_now(&seq, 1).await.unwrap());

        assert_eq!(registry.purge_acknowledged(&seq, &|n: MessageNumber| n == 1).await, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_drives_due_candidates() {
        let registry = registry();
        let seq = SequenceKey::from("S1");
        registry.add_unacknowledged(message("S1", 1)).unwrap();
        assert!(registry.is_manual());

        let status = registry.retransmission_status(&seq, 1).unwrap();
        assert_eq!(status.phase, Phase::Unscheduled);

        assert_eq!(registry.drive_due(Instant::now()).await, 0);
        assert_eq!(
            registry
                .drive_due(Instant::now() + Duration::from_millis(100))
                .await,
            1
        );

        let status = registry.retransmission_status(&seq, 1).unwrap();
        assert_eq!(status.retries, 1);
        assert_eq!(status.interval, Duration::from_millis(400));
    }

    #[tokio::test]
    async fn attempt_now_unknown_message() {
        let registry = registry();
        let err = registry
            .attempt_now(&SequenceKey::from("S1"), 9)
            .await
            .unwrap_err();
        assert!(matches!(err, RetransmitError::UnknownMessage { number: 9, .. }));
    }

    #[tokio::test]
    async fn statuses_are_ordered_by_number() {
        let registry = registry();
        let seq = SequenceKey::from("S1");
        for number in [3, 1, 2] {
            registry.add_unacknowledged(message("S1", number)).unwrap();
        }

        let numbers: Vec<MessageNumber> = registry
            .retransmission_statuses(&seq)
            .into_keys()
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(registry.sequences(), vec![seq]);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let registry = Arc::new(registry());
        let candidate = registry.add_unacknowledged(message("S1", 1)).unwrap();
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let serving = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.serve(rx).await })
        };
        tx.send(Signal::Shutdown).unwrap();
        serving.await.unwrap();

        assert_eq!(candidate.phase(), Phase::Cancelled);
        assert_eq!(registry.count_all_unacknowledged(), 1);
    }
}
