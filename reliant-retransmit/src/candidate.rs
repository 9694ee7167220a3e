//! Per-message retransmission state.
//!
//! A [`ResendCandidate`] owns one unacknowledged message and its retry
//! schedule. Everything mutable lives behind a single mutex that is never
//! held across a resend; the registry may take it while holding its own
//! lock, never the other way round.
//!
//! Timeline for a policy with base `b` and backoff `f`: the first resend is
//! due at `b` after registration, the k-th at `b * (f^0 + ... + f^(k-1))`.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use reliant_common::{MessageNumber, SequenceKey, resend};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{
    binding::{Engine, RetryEvent},
    error::ScheduleError,
    executor::ResendJob,
    message::OutboundMessage,
    policy::{RetryLimit, RetryPolicy},
    scheduler::TimerHandle,
};

/// Where a candidate is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// A timer is armed for the next retry.
    Scheduled,
    /// A resend has been handed to an executor and has not completed.
    Pending,
    /// The retry limit has been reached; the candidate waits for a purge.
    Exhausted,
    /// Acknowledged and purged.
    Resolved,
    /// Forcibly terminated.
    Cancelled,
    /// The sequence is suspended.
    Suspended,
    /// The destination is anonymous, so there is nothing to resend to.
    Unaddressable,
    /// No timer is armed: manual mode, or the scheduler refused the timer.
    Unscheduled,
}

impl Phase {
    /// Resolved or cancelled; the payload has been released.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }
}

/// Snapshot of a candidate's retry state.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStatus {
    pub retries: u32,
    pub next: Instant,
    pub previous: Option<Instant>,
    pub interval: Duration,
    pub backoff: f64,
    pub max_retries: RetryLimit,
    pub pending: bool,
    pub suspended: bool,
    pub phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Resolved,
    Cancelled,
}

#[derive(Debug)]
struct CandidateState {
    message: Option<Arc<OutboundMessage>>,
    retries: u32,
    next: Instant,
    previous: Option<Instant>,
    interval: Duration,
    pending: bool,
    suspended: bool,
    exhausted: bool,
    terminal: Option<Terminal>,
    timer: Option<TimerHandle>,
    generation: u64,
    request_ack: bool,
}

impl CandidateState {
    /// No further resend can happen without outside intervention.
    const fn is_inert(&self) -> bool {
        self.terminal.is_some() || self.exhausted || self.message.is_none()
    }

    fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

/// One unacknowledged message and its retry schedule.
#[derive(Debug)]
pub struct ResendCandidate {
    sequence: SequenceKey,
    number: MessageNumber,
    policy: RetryPolicy,
    owner: Option<String>,
    addressable: bool,
    engine: Arc<Engine>,
    state: Mutex<CandidateState>,
}

impl ResendCandidate {
    /// Create a candidate for `message`, arming its first retry unless it
    /// starts suspended, is unaddressable, or may never be retried.
    pub(crate) fn start(
        message: OutboundMessage,
        engine: Arc<Engine>,
        suspended: bool,
    ) -> Arc<Self> {
        let now = Instant::now();
        let policy = message.policy.clone();
        let addressable = !message.destination.is_anonymous();
        let base = policy.base_interval();

        let candidate = Arc::new(Self {
            sequence: message.sequence.clone(),
            number: message.number,
            owner: message.owner.clone(),
            addressable,
            engine,
            state: Mutex::new(CandidateState {
                message: Some(Arc::new(message)),
                retries: 0,
                next: now,
                previous: None,
                interval: base,
                pending: false,
                suspended,
                exhausted: !policy.should_retry(0),
                terminal: None,
                timer: None,
                generation: 0,
                request_ack: true,
            }),
            policy,
        });

        {
            let mut state = candidate.state.lock();
            match (now.checked_add(base), candidate.policy.initial_interval()) {
                (Some(next), Some(interval)) => {
                    state.next = next;
                    state.interval = interval;
                    if addressable && !suspended && !state.exhausted {
                        candidate.arm(&mut state, next);
                    }
                }
                _ => warn!(
                    sequence = %candidate.sequence,
                    number = candidate.number,
                    "Retry schedule overflows, message will not be retransmitted automatically"
                ),
            }
        }

        candidate
    }

    pub const fn sequence(&self) -> &SequenceKey {
        &self.sequence
    }

    pub const fn number(&self) -> MessageNumber {
        self.number
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn retries(&self) -> u32 {
        self.state.lock().retries
    }

    pub fn next_retry(&self) -> Instant {
        self.state.lock().next
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    pub fn phase(&self) -> Phase {
        self.phase_of(&self.state.lock())
    }

    pub fn status(&self) -> RetryStatus {
        let state = self.state.lock();
        RetryStatus {
            retries: state.retries,
            next: state.next,
            previous: state.previous,
            interval: state.interval,
            backoff: self.policy.backoff,
            max_retries: self.policy.max_retries,
            pending: state.pending,
            suspended: state.suspended,
            phase: self.phase_of(&state),
        }
    }

    fn phase_of(&self, state: &CandidateState) -> Phase {
        match state.terminal {
            Some(Terminal::Resolved) => Phase::Resolved,
            Some(Terminal::Cancelled) => Phase::Cancelled,
            None if state.exhausted => Phase::Exhausted,
            None if !self.addressable => Phase::Unaddressable,
            None if state.pending => Phase::Pending,
            None if state.suspended => Phase::Suspended,
            None if state.timer.is_some() => Phase::Scheduled,
            None => Phase::Unscheduled,
        }
    }

    /// Replace any live timer with one firing at `at`.
    fn arm(self: &Arc<Self>, state: &mut CandidateState, at: Instant) {
        state.disarm();
        match self.engine.arm(self, at, state.generation) {
            Ok(timer) => state.timer = timer,
            Err(e) => self.unscheduled(&e),
        }
    }

    fn unscheduled(&self, error: &ScheduleError) {
        warn!(
            sequence = %self.sequence,
            number = self.number,
            error = %error,
            "Failed to schedule retransmission"
        );
    }

    /// Timer callback.
    pub(crate) async fn on_fire(self: Arc<Self>, event: RetryEvent) {
        debug_assert_eq!(event.number, self.number);
        debug_assert_eq!(event.sequence, self.sequence);
        trace!(
            sequence = %event.sequence,
            number = event.number,
            generation = event.generation,
            "Retry timer fired"
        );

        if let Some(job) = self.fire(Some(event.generation), None) {
            self.engine.execute(self.owner(), job).await;
        }
    }

    /// Mark the candidate pending and build its resend job.
    ///
    /// `generation` is the timer generation for timer-driven fires; `None`
    /// forces an attempt and supersedes any live timer. `due` skips the
    /// attempt unless the next retry instant has been reached.
    pub(crate) fn fire(
        self: &Arc<Self>,
        generation: Option<u64>,
        due: Option<Instant>,
    ) -> Option<ResendJob> {
        let mut state = self.state.lock();

        match generation {
            Some(generation) if generation != state.generation => return None,
            Some(_) => state.timer = None,
            None => {}
        }

        if state.pending || state.suspended || state.is_inert() || !self.addressable {
            return None;
        }
        if due.is_some_and(|now| state.next > now) {
            return None;
        }
        if generation.is_none() {
            state.disarm();
        }

        let message = state.message.clone()?;
        state.pending = true;
        let request_ack = std::mem::replace(&mut state.request_ack, false);

        let candidate = Arc::clone(self);
        Some(Box::pin(async move {
            candidate.send(&message, request_ack).await;
        }))
    }

    async fn send(self: Arc<Self>, message: &OutboundMessage, request_ack: bool) {
        if !self.begin_send() {
            self.abandon(request_ack);
            return;
        }

        resend!(
            "Resending message {} on sequence {} (request_ack: {})",
            self.number,
            self.sequence,
            request_ack
        );

        match self.engine.strategy().resend(message, request_ack).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => debug!(
                sequence = %self.sequence,
                number = self.number,
                error = %e,
                "Transient failure resending message"
            ),
            Err(e) => warn!(
                sequence = %self.sequence,
                number = self.number,
                error = %e,
                "Failed to resend message"
            ),
        }

        self.attempted();
    }

    /// Re-check right before the transport is invoked; a purge, cancel or
    /// suspension since the fire means the send is skipped.
    fn begin_send(&self) -> bool {
        let state = self.state.lock();
        state.pending && !state.suspended && !state.is_inert()
    }

    fn abandon(&self, request_ack: bool) {
        let mut state = self.state.lock();
        state.pending = false;
        state.request_ack |= request_ack;
    }

    /// Record a completed attempt and schedule the next one.
    fn attempted(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.pending = false;

        if state.terminal.is_some() {
            return;
        }

        state.retries = state.retries.saturating_add(1);
        state.previous = Some(Instant::now());

        if !self.policy.should_retry(state.retries) {
            state.exhausted = true;
            state.disarm();
            debug!(
                sequence = %self.sequence,
                number = self.number,
                retries = state.retries,
                "Retry limit reached"
            );
            return;
        }

        if state.suspended {
            return;
        }

        let next = state.next.checked_add(state.interval);
        let interval = self.policy.next_interval(state.interval);
        match (next, interval) {
            (Some(next), Some(interval)) => {
                state.next = next;
                state.interval = interval;
                self.arm(&mut state, next);
            }
            _ => {
                state.disarm();
                self.unscheduled(&ScheduleError::OutOfRange);
            }
        }
    }

    /// The message was acknowledged: stop retrying and release the payload.
    pub(crate) fn resolved(&self) {
        self.terminate(Terminal::Resolved);
    }

    /// Forced termination: stop retrying and release the payload.
    pub(crate) fn cancel(&self) {
        self.terminate(Terminal::Cancelled);
    }

    fn terminate(&self, terminal: Terminal) {
        let mut state = self.state.lock();
        state.disarm();
        state.pending = false;
        state.message = None;
        if state.terminal.is_none() {
            state.terminal = Some(terminal);
        }
    }

    /// Stop the timer but keep retries and interval.
    pub(crate) fn suspend(&self) {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        state.disarm();
        state.suspended = true;
    }

    /// Leave suspension and attempt a resend immediately.
    pub(crate) fn resume(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if !state.suspended {
            return;
        }
        state.suspended = false;
        state.request_ack = true;

        if state.is_inert() || !self.addressable {
            return;
        }

        let now = Instant::now();
        state.next = now;
        self.arm(&mut state, now);
    }
}
