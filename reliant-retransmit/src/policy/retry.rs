//! Retry policy for retransmission.
//!
//! A policy is attached to every outbound message and never changes while the
//! message awaits acknowledgment. It fixes the first retry delay, the factor
//! by which the delay grows after each attempt, and how many resends may be
//! made at all.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff multiplier used by [`RetryPolicy::exponential`].
pub const DEFAULT_EXPONENTIAL_BACKOFF: f64 = 2.0;

/// Upper bound on the number of resends of a single message.
///
/// `Limited(0)` disables retransmission: the message is tracked until it is
/// acknowledged but never resent. `Unlimited` keeps resending until an
/// acknowledgment or a forced purge removes the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetryLimit {
    #[default]
    Unlimited,
    Limited(u32),
}

impl RetryLimit {
    /// Map a signed count where any negative value means unlimited.
    #[must_use]
    pub fn from_count(count: i64) -> Self {
        u32::try_from(count).map_or_else(
            |_| {
                if count < 0 {
                    Self::Unlimited
                } else {
                    Self::Limited(u32::MAX)
                }
            },
            Self::Limited,
        )
    }

    /// Whether another resend may follow `retries` completed ones.
    #[must_use]
    pub const fn allows(self, retries: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => retries < max,
        }
    }
}

/// Retransmission timing for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay between sending the message and its first resend (milliseconds).
    ///
    /// Default: 3000 ms
    #[serde(default = "defaults::base_interval_ms")]
    pub base_interval_ms: u64,

    /// Factor applied to the interval after every resend.
    ///
    /// `1.0` keeps the interval constant. Values below `1.0` are rejected by
    /// [`RetryPolicy::validate`].
    ///
    /// Default: 2.0
    #[serde(default = "defaults::backoff")]
    pub backoff: f64,

    /// Maximum number of resends.
    ///
    /// Default: `Unlimited`
    #[serde(default)]
    pub max_retries: RetryLimit,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval_ms: defaults::base_interval_ms(),
            backoff: defaults::backoff(),
            max_retries: RetryLimit::default(),
        }
    }
}

/// Why a [`RetryPolicy`] is unusable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("base retransmission interval must be greater than zero")]
    ZeroInterval,

    #[error("backoff multiplier must be a finite number >= 1.0, got {0}")]
    InvalidBackoff(f64),
}

impl RetryPolicy {
    /// Build a policy from a base interval, rounded up to whole milliseconds.
    #[must_use]
    pub fn new(base_interval: Duration, backoff: f64, max_retries: RetryLimit) -> Self {
        let millis = base_interval.as_nanos().div_ceil(1_000_000);
        Self {
            base_interval_ms: u64::try_from(millis).unwrap_or(u64::MAX),
            backoff,
            max_retries,
        }
    }

    /// Retry every `base_interval` without growth.
    #[must_use]
    pub fn constant(base_interval: Duration, max_retries: RetryLimit) -> Self {
        Self::new(base_interval, 1.0, max_retries)
    }

    /// Double the interval after each resend.
    #[must_use]
    pub fn exponential(base_interval: Duration, max_retries: RetryLimit) -> Self {
        Self::new(base_interval, DEFAULT_EXPONENTIAL_BACKOFF, max_retries)
    }

    /// Check the policy can drive a retry schedule.
    ///
    /// # Errors
    ///
    /// If the base interval is zero or the backoff is not a finite value >= 1.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.base_interval_ms == 0 {
            return Err(PolicyError::ZeroInterval);
        }
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err(PolicyError::InvalidBackoff(self.backoff));
        }
        Ok(())
    }

    #[must_use]
    pub const fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    /// Interval added to the schedule after the first resend.
    ///
    /// The first resend happens `base_interval` after the message was sent;
    /// the gap to the second one is already scaled by the backoff.
    #[must_use]
    pub fn initial_interval(&self) -> Option<Duration> {
        scale(self.base_interval(), self.backoff)
    }

    /// The interval following `current`, `None` on overflow.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Option<Duration> {
        scale(current, self.backoff)
    }

    /// Whether another resend may follow `retries` completed ones.
    #[must_use]
    pub const fn should_retry(&self, retries: u32) -> bool {
        self.max_retries.allows(retries)
    }
}

/// Multiply a duration by a floating factor, rounding to whole nanoseconds.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "The product is range checked before the conversion back"
)]
fn scale(interval: Duration, factor: f64) -> Option<Duration> {
    let nanos = (interval.as_nanos() as f64 * factor).round();
    if !nanos.is_finite() || nanos < 0.0 || nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

mod defaults {
    pub const fn base_interval_ms() -> u64 {
        3000
    }

    pub const fn backoff() -> f64 {
        super::DEFAULT_EXPONENTIAL_BACKOFF
    }
}
