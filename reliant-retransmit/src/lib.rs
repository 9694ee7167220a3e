//! At-least-once retransmission of outbound messages.
//!
//! Every message handed to a [`RetransmissionRegistry`] is resent through a
//! [`ResendStrategy`] with exponential backoff until the receiver
//! acknowledges it, the retry limit is reached, or the sequence is purged.
//!
//! ```ignore
//! let registry = RetransmissionRegistry::with_scheduler(strategy, Arc::new(TokioScheduler::new()));
//! registry.add_unacknowledged(message)?;
//! // ... later, when an acknowledgment header arrives
//! registry.purge_acknowledged(&sequence, &ranges).await;
//! ```

pub mod ack;
pub mod binding;
pub mod candidate;
pub mod config;
pub mod error;
pub mod executor;
pub mod message;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod strategy;

pub use ack::{AcknowledgementRanges, AcknowledgementState};
pub use binding::RetryEvent;
pub use candidate::{Phase, ResendCandidate, RetryStatus};
pub use config::{ExecutorConfig, RetransmissionConfig, SchedulerMode};
pub use error::{ConfigError, RetransmitError, ScheduleError, TransportError};
pub use executor::{ExecutionPolicy, Executor, InlineExecutor, PooledExecutor, ResendJob};
pub use message::{Destination, OutboundMessage};
pub use policy::{PolicyError, RetryLimit, RetryPolicy};
pub use registry::RetransmissionRegistry;
pub use reliant_common::{MessageNumber, SequenceKey};
pub use scheduler::{DelayedTaskScheduler, ManualScheduler, TimerHandle, TokioScheduler};
pub use strategy::ResendStrategy;
