//! Binds resend candidates to a delayed-task facility.
//!
//! A candidate arms a timer for its next-retry instant through the
//! [`Engine`]. When the timer fires, the candidate receives a [`RetryEvent`]
//! carrying the generation it was armed with; any later arm, cancel or
//! suspension bumps the generation so a superseded timer is ignored.

use std::sync::{Arc, Weak};

use reliant_common::{MessageNumber, SequenceKey};
use tokio::time::Instant;

use crate::{
    candidate::ResendCandidate,
    error::ScheduleError,
    executor::{ExecutionPolicy, ResendJob},
    scheduler::{DelayedTaskScheduler, TimerHandle},
    strategy::ResendStrategy,
};

/// Delivered to a candidate when its retry timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub sequence: SequenceKey,
    pub number: MessageNumber,
    pub generation: u64,
}

/// Collaborators shared by every candidate of a registry.
#[derive(Clone)]
pub(crate) struct Engine {
    scheduler: Option<Arc<dyn DelayedTaskScheduler>>,
    executors: ExecutionPolicy,
    strategy: Arc<dyn ResendStrategy>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("executors", &self.executors)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn new(strategy: Arc<dyn ResendStrategy>) -> Self {
        Self {
            scheduler: None,
            executors: ExecutionPolicy::default(),
            strategy,
        }
    }

    pub(crate) fn set_scheduler(&mut self, scheduler: Option<Arc<dyn DelayedTaskScheduler>>) {
        self.scheduler = scheduler;
    }

    pub(crate) fn set_executors(&mut self, executors: ExecutionPolicy) {
        self.executors = executors;
    }

    /// Without a scheduler candidates are only driven by the caller.
    pub(crate) const fn is_manual(&self) -> bool {
        self.scheduler.is_none()
    }

    pub(crate) fn strategy(&self) -> &dyn ResendStrategy {
        self.strategy.as_ref()
    }

    /// Ask the scheduler to deliver a [`RetryEvent`] to `candidate` at `at`.
    ///
    /// Returns `Ok(None)` in manual mode. The timer task only keeps a weak
    /// reference, so a purged candidate is freed even if its timer survives.
    pub(crate) fn arm(
        &self,
        candidate: &Arc<ResendCandidate>,
        at: Instant,
        generation: u64,
    ) -> Result<Option<TimerHandle>, ScheduleError> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(None);
        };

        let event = RetryEvent {
            sequence: candidate.sequence().clone(),
            number: candidate.number(),
            generation,
        };
        let target: Weak<ResendCandidate> = Arc::downgrade(candidate);

        scheduler
            .schedule(
                at,
                Box::pin(async move {
                    if let Some(candidate) = target.upgrade() {
                        candidate.on_fire(event).await;
                    }
                }),
            )
            .map(Some)
    }

    /// Hand a resend job to the executor registered for `owner`.
    pub(crate) async fn execute(&self, owner: Option<&str>, job: ResendJob) {
        self.executors.resolve(owner).execute(job).await;
    }
}
