//! Delayed-task facilities used to fire retransmission timers.
//!
//! - [`TokioScheduler`]: one sleeping tokio task per timer
//! - [`ManualScheduler`]: tasks wait in a queue until the caller runs them,
//!   for deterministic tests

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::Notify, time::Instant};

use crate::error::ScheduleError;

pub type ScheduledTask = BoxFuture<'static, ()>;

/// Cancels a scheduled task that has not started yet.
///
/// Dropping the handle leaves the task scheduled.
pub struct TimerHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Prevent the task from running if its due time has not passed yet.
    ///
    /// A task that is already running is left to finish.
    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

/// Runs a task once, no earlier than a given instant.
pub trait DelayedTaskScheduler: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// If the scheduler cannot accept tasks any more.
    fn schedule(&self, at: Instant, task: ScheduledTask) -> Result<TimerHandle, ScheduleError>;
}

/// Timers backed by the tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
    shutdown: Arc<AtomicBool>,
}

impl TokioScheduler {
    /// Spawn onto the runtime that is current when this is called, or the
    /// one current at each `schedule` call otherwise.
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
            shutdown: Arc::default(),
        }
    }

    /// Refuse all later `schedule` calls. Timers already armed still fire.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl DelayedTaskScheduler for TokioScheduler {
    fn schedule(&self, at: Instant, task: ScheduledTask) -> Result<TimerHandle, ScheduleError> {
        if self.is_shutdown() {
            return Err(ScheduleError::Shutdown);
        }

        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| ScheduleError::NoRuntime)?,
        };

        let cancelled = Arc::new(Notify::new());
        let notified = Arc::clone(&cancelled);

        handle.spawn(async move {
            // Once the sleep wins, cancellation can no longer interrupt the task.
            tokio::select! {
                biased;
                () = notified.notified() => {}
                () = tokio::time::sleep_until(at) => task.await,
            }
        });

        Ok(TimerHandle::new(move || cancelled.notify_one()))
    }
}

#[derive(Default)]
struct ManualQueue {
    tasks: BTreeMap<(Instant, u64), ScheduledTask>,
}

/// Keeps scheduled tasks until [`ManualScheduler::run_due`] is called.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<ManualQueue>>,
    next_id: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("scheduled", &self.len())
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest due instant among waiting tasks.
    pub fn next_due(&self) -> Option<Instant> {
        self.queue.lock().tasks.keys().next().map(|(at, _)| *at)
    }

    /// Run every task due at or before `now`, earliest first, including tasks
    /// scheduled by the tasks being run. Returns the number of tasks run.
    pub async fn run_due(&self, now: Instant) -> usize {
        let mut ran = 0;
        loop {
            let task = {
                let mut queue = self.queue.lock();
                let due = queue
                    .tasks
                    .first_key_value()
                    .is_some_and(|((at, _), _)| *at <= now);
                if !due {
                    break;
                }
                queue.tasks.pop_first().map(|(_, task)| task)
            };

            if let Some(task) = task {
                task.await;
                ran += 1;
            }
        }
        ran
    }
}

impl DelayedTaskScheduler for ManualScheduler {
    fn schedule(&self, at: Instant, task: ScheduledTask) -> Result<TimerHandle, ScheduleError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ScheduleError::Shutdown);
        }

        let key = (at, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.queue.lock().tasks.insert(key, task);

        let queue = Arc::clone(&self.queue);
        Ok(TimerHandle::new(move || {
            queue.lock().tasks.remove(&key);
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use super::*;

    fn counter_task(counter: &Arc<AtomicUsize>) -> ScheduledTask {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_at_instant() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let _handle = scheduler
            .schedule(Instant::now() + Duration::from_millis(100), counter_task(&fired))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_cancel_before_due() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let handle = scheduler
            .schedule(Instant::now() + Duration::from_millis(100), counter_task(&fired))
            .unwrap();
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_refuses_after_shutdown() {
        let scheduler = TokioScheduler::new();
        scheduler.shutdown();

        let fired = Arc::new(AtomicUsize::new(0));
        let result = scheduler.schedule(Instant::now(), counter_task(&fired));
        assert_eq!(result.unwrap_err(), ScheduleError::Shutdown);
    }

    #[tokio::test]
    async fn manual_runs_only_due_tasks() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        scheduler.schedule(now, counter_task(&fired)).unwrap();
        scheduler
            .schedule(now + Duration::from_secs(5), counter_task(&fired))
            .unwrap();
        let cancelled = scheduler
            .schedule(now + Duration::from_secs(1), counter_task(&fired))
            .unwrap();
        cancelled.cancel();

        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.run_due(now).await, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.next_due(), Some(now + Duration::from_secs(5)));

        assert_eq!(scheduler.run_due(now + Duration::from_secs(10)).await, 1);
        assert!(scheduler.is_empty());
    }
}
