//! Retry pacing for the connectivity sessions
//!
//! Both recovery loops retry at a fixed interval, the link layer fast and the
//! broker layer slow. The policy carries that pacing plus an optional attempt
//! budget so tests and embedders can bound loops that by default never give
//! up.

use std::num::NonZeroU32;
use std::time::Duration;

/// Fixed-interval retry pacing with an optional attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Maximum number of attempts, `None` to retry forever.
    pub max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    /// Retry forever at `interval`.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Retry at `interval`, at most `attempts` times.
    pub fn bounded(interval: Duration, attempts: NonZeroU32) -> Self {
        Self {
            interval,
            max_attempts: Some(attempts),
        }
    }

    /// Whether attempt number `attempt` (1-based) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max.get(),
            None => true,
        }
    }
}
