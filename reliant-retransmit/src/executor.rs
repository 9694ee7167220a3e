//! Execution of resend jobs.
//!
//! A resend job is the future that performs one resend of one message. The
//! [`ExecutionPolicy`] picks the executor for a message from its owner:
//! owners may register a dedicated executor, everything else runs inline in
//! the task that fired the retry timer.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::config::ExecutorConfig;

/// A single resend, ready to run.
pub type ResendJob = BoxFuture<'static, ()>;

#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// Run or hand off `job`. Returning does not imply the job has finished.
    async fn execute(&self, job: ResendJob);
}

/// Runs the job to completion in the calling task.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

#[async_trait]
impl Executor for InlineExecutor {
    async fn execute(&self, job: ResendJob) {
        job.await;
    }
}

/// Spawns jobs onto the tokio runtime with bounded concurrency.
///
/// Jobs beyond `max_concurrent` wait for a permit inside their own task, so
/// the timer that submitted them is never blocked.
#[derive(Debug, Clone)]
pub struct PooledExecutor {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl PooledExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Jobs currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }
}

#[async_trait]
impl Executor for PooledExecutor {
    async fn execute(&self, job: ResendJob) {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => job.await,
                Err(e) => tracing::error!("Resend executor closed, dropping job: {e}"),
            }
        });
    }
}

/// Maps message owners to executors.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    executors: AHashMap<String, Arc<dyn Executor>>,
    fallback: Arc<dyn Executor>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            executors: AHashMap::new(),
            fallback: Arc::new(InlineExecutor),
        }
    }
}

impl ExecutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pooled executor per configured owner.
    pub fn from_config(executors: &AHashMap<String, ExecutorConfig>) -> Self {
        let mut policy = Self::new();
        for (owner, config) in executors {
            policy.register(owner.clone(), Arc::new(PooledExecutor::new(config.max_concurrent)));
        }
        policy
    }

    /// Route resends of messages owned by `owner` to `executor`, replacing
    /// any earlier registration.
    pub fn register(&mut self, owner: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(owner.into(), executor);
    }

    #[must_use]
    pub fn with_executor(mut self, owner: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(owner, executor);
        self
    }

    /// The executor for `owner`, or the inline fallback.
    pub fn resolve(&self, owner: Option<&str>) -> Arc<dyn Executor> {
        owner
            .and_then(|owner| self.executors.get(owner))
            .map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }

    pub fn is_registered(&self, owner: &str) -> bool {
        self.executors.contains_key(owner)
    }
}
