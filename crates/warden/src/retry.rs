//! Call-until-success with bounded backoff.
//!
//! An attempt is invoked repeatedly until it succeeds, aborts, or the time
//! budget is spent. Between attempts the caller sleeps for a delay taken from
//! a [`Schedule`]; the delay never exceeds the time left in the budget.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::error::ControlError;
use crate::timeout::{Clock, MonotonicClock, Remaining, TimeoutBudget};

/// Delay policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Start at `start` and multiply by `growth_numerator / growth_denominator`
    /// after each attempt, never exceeding `limit`.
    Backoff {
        /// First delay.
        start: Duration,
        /// Numerator of the growth factor.
        growth_numerator: u32,
        /// Denominator of the growth factor.
        growth_denominator: u32,
        /// Upper bound for a single delay.
        limit: Duration,
    },
    /// Sleep for whatever time is left; the attempt is in charge of waiting
    /// itself and only wants to be called again once the budget is spent or
    /// it was interrupted early.
    RemainingTime,
}

impl Schedule {
    /// Backoff used when polling for process state: 10ms growing by half each
    /// attempt, capped at 100ms.
    pub const PROCESS_POLL: Self =
        Self::backoff(Duration::from_millis(10), 3, 2, Duration::from_millis(100));

    /// Creates a growing backoff schedule.
    #[must_use]
    pub const fn backoff(
        start: Duration,
        growth_numerator: u32,
        growth_denominator: u32,
        limit: Duration,
    ) -> Self {
        Self::Backoff {
            start,
            growth_numerator,
            growth_denominator,
            limit,
        }
    }

    const fn delays(self) -> Delays {
        Delays {
            schedule: self,
            previous: None,
        }
    }
}

struct Delays {
    schedule: Schedule,
    previous: Option<Duration>,
}

impl Delays {
    fn next_delay(&mut self, remaining: Duration) -> Duration {
        match self.schedule {
            Schedule::RemainingTime => remaining,
            Schedule::Backoff {
                start,
                growth_numerator,
                growth_denominator,
                limit,
            } => {
                let delay = match self.previous {
                    None => start,
                    Some(previous) => previous
                        .checked_mul(growth_numerator)
                        .and_then(|grown| grown.checked_div(growth_denominator))
                        .map_or(limit, |grown| grown.min(limit)),
                };
                self.previous = Some(delay);
                delay.min(remaining)
            }
        }
    }
}

/// Result of an unsuccessful attempt.
#[derive(Debug)]
pub enum Retryable<E> {
    /// Try again later; the optional payload is reported if time runs out.
    Again(Option<E>),
    /// Stop retrying and surface the error immediately.
    Abort(E),
}

/// Failure of a bounded retry.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The budget was spent before the attempt succeeded.
    #[error("operation did not complete within {timeout:?}")]
    Timeout {
        /// Budget that was exhausted.
        timeout: Duration,
        /// Payload of the final [`Retryable::Again`], if any.
        last: Option<E>,
    },
    /// The attempt gave up.
    #[error("{0}")]
    Aborted(E),
}

impl From<RetryError<ControlError>> for ControlError {
    fn from(error: RetryError<ControlError>) -> Self {
        match error {
            RetryError::Timeout { timeout, .. } => Self::RetryTimeout { timeout },
            RetryError::Aborted(inner) => inner,
        }
    }
}

/// Calls `attempt` until it succeeds, aborts, or `timeout` has elapsed.
///
/// # Errors
///
/// Returns [`RetryError::Timeout`] when the budget runs out and
/// [`RetryError::Aborted`] when the attempt gives up.
pub fn retry<T, E, F>(attempt: F, schedule: Schedule, timeout: Duration) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, Retryable<E>>,
{
    retry_with(attempt, schedule, timeout, &MonotonicClock, thread::sleep)
}

/// Like [`retry`], reading time from `clock` and sleeping through `wait`.
///
/// # Errors
///
/// See [`retry`].
pub fn retry_with<T, E, F, C, W>(
    mut attempt: F,
    schedule: Schedule,
    timeout: Duration,
    clock: &C,
    mut wait: W,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, Retryable<E>>,
    C: Clock,
    W: FnMut(Duration),
{
    let budget = TimeoutBudget::with_clock(Some(timeout), clock);
    budget.start();
    let mut delays = schedule.delays();
    loop {
        let last = match attempt() {
            Ok(value) => return Ok(value),
            Err(Retryable::Abort(error)) => return Err(RetryError::Aborted(error)),
            Err(Retryable::Again(last)) => last,
        };
        let remaining = budget
            .remaining()
            .map_or(Duration::ZERO, Remaining::saturating);
        if remaining.is_zero() {
            return Err(RetryError::Timeout { timeout, last });
        }
        wait(delays.next_delay(remaining));
    }
}
