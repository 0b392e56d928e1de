//! Bounded linear backoff for the analysis-job poll loop.
//!
//! [`PollSchedule`] hands out the wait before each re-poll: `n × increment`
//! for the n-th wait, capped at the per-poll ceiling, and clipped so the sum
//! of waits never exceeds the total budget. Once the budget is spent it
//! yields `None` and the caller gives up.
//!
//! Zero increments and ceilings are raised to [`MIN_POLL_DELAY`], so every
//! delay spends part of the budget and the schedule always ends.

use crate::config::PollPolicy;
use std::time::Duration;

/// Smallest delay the schedule hands out.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

/// Iterator over poll delays for one job.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    policy: PollPolicy,
    attempt: u32,
    waited: Duration,
}

impl PollSchedule {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            waited: Duration::ZERO,
        }
    }

    /// Total time handed out so far.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for PollSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let remaining = self.policy.max_total_wait.saturating_sub(self.waited);
        if remaining.is_zero() {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        let ceiling = self.policy.max_delay.max(MIN_POLL_DELAY);
        let linear = self
            .policy
            .increment
            .max(MIN_POLL_DELAY)
            .checked_mul(self.attempt)
            .unwrap_or(ceiling);
        let delay = linear.min(ceiling).min(remaining);
        self.waited += delay;
        Some(delay)
    }
}
