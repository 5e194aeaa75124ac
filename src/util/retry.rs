use std::time::{Duration, Instant};
use thiserror::Error;

use crate::util::cancel::CancelToken;

/// Granularity of abortable sleeps; cancellation latency is bounded by this.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Backoff parameters for a retried operation.
///
/// The defaults mirror the replication path: the first delay is 16ms, each
/// subsequent delay doubles, and no single delay exceeds 4096ms.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    start_delay: Duration,
    backoff_factor: u32,
    max_single_delay: Duration,
    max_total_budget: Duration,
}

impl RetryPolicy {
    pub fn new(
        start_delay: Duration,
        backoff_factor: u32,
        max_single_delay: Duration,
        max_total_budget: Duration,
    ) -> Self {
        Self {
            start_delay,
            backoff_factor: backoff_factor.max(1),
            max_single_delay,
            max_total_budget,
        }
    }

    /// Replication backoff: 16ms doubling up to 4096ms, bounded by `budget`.
    pub fn replication(budget: Duration) -> Self {
        Self::new(
            Duration::from_millis(16),
            2,
            Duration::from_millis(4 * 1024),
            budget,
        )
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.max_total_budget = budget;
        self
    }

    pub fn session(&self) -> RetrySession {
        self.session_from(Instant::now())
    }

    pub fn session_from(&self, start: Instant) -> RetrySession {
        RetrySession {
            policy: self.clone(),
            current_delay: self.start_delay,
            started_at: start,
        }
    }
}

/// Per-operation backoff state. Created when a retryable operation starts and
/// discarded when it succeeds, exhausts its budget, or is cancelled.
#[derive(Debug)]
pub struct RetrySession {
    policy: RetryPolicy,
    current_delay: Duration,
    started_at: Instant,
}

impl RetrySession {
    /// Computes the next delay without sleeping.
    ///
    /// Fails with `Exhausted` once elapsed time has reached the total budget.
    /// Otherwise returns `min(current_delay, remaining_budget)` and grows the
    /// current delay by the backoff factor, capped at the single-delay
    /// maximum. Successive delays are non-decreasing until the budget clamp
    /// engages.
    pub fn next_delay(&mut self, now: Instant) -> Result<Duration, RetryError> {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed >= self.policy.max_total_budget {
            return Err(RetryError::Exhausted {
                elapsed,
                budget: self.policy.max_total_budget,
            });
        }
        let remaining = self.policy.max_total_budget - elapsed;
        let delay = self.current_delay.min(remaining);
        self.current_delay = self
            .current_delay
            .saturating_mul(self.policy.backoff_factor)
            .min(self.policy.max_single_delay);
        Ok(delay)
    }

    /// Suspends the caller for the next delay, polling `cancel` between
    /// slices. Cancellation aborts with `Cancelled`, distinct from budget
    /// exhaustion.
    pub fn wait(&mut self, cancel: &CancelToken) -> Result<(), RetryError> {
        let delay = self.next_delay(Instant::now())?;
        sleep_with_cancel(delay, cancel)
    }

    /// Restores the initial delay and restarts the elapsed-time clock.
    pub fn reset(&mut self, now: Instant) {
        self.current_delay = self.policy.start_delay;
        self.started_at = now;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// Sleeps `delay` in slices so a cancellation request is honored promptly.
pub fn sleep_with_cancel(delay: Duration, cancel: &CancelToken) -> Result<(), RetryError> {
    if cancel.is_cancelled() {
        return Err(RetryError::Cancelled);
    }
    let mut remaining = delay;
    while !remaining.is_zero() {
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("retry budget exhausted after {elapsed:?} (budget {budget:?})")]
    Exhausted { elapsed: Duration, budget: Duration },
    #[error("operation cancelled")]
    Cancelled,
}
