//! Deadline tracking shared across sequential waits.
//!
//! A [`TimeoutBudget`] fixes its reference instant on the first call to
//! [`TimeoutBudget::remaining`] rather than at construction, so a budget can
//! be built ahead of time and only starts counting once the guarded operation
//! actually begins waiting.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of monotonic time. Tests substitute a manually advanced clock.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Time left before a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    /// The deadline lies this far in the future (possibly zero).
    Left(Duration),
    /// The deadline passed this long ago. Only reported by budgets built
    /// with [`TimeoutBudget::allow_negative`].
    Overdue(Duration),
}

impl Remaining {
    /// Returns `true` once no time is left.
    #[must_use]
    pub const fn is_expired(self) -> bool {
        match self {
            Self::Left(left) => left.is_zero(),
            Self::Overdue(_) => true,
        }
    }

    /// Returns `true` when the deadline has strictly passed.
    #[must_use]
    pub const fn is_overdue(self) -> bool {
        matches!(self, Self::Overdue(_))
    }

    /// Time left, saturating at zero.
    #[must_use]
    pub const fn saturating(self) -> Duration {
        match self {
            Self::Left(left) => left,
            Self::Overdue(_) => Duration::ZERO,
        }
    }
}

/// Countdown towards an optional deadline.
#[derive(Debug)]
pub struct TimeoutBudget<C = MonotonicClock> {
    total: Option<Duration>,
    allow_negative: bool,
    start: Cell<Option<Instant>>,
    clock: C,
}

impl TimeoutBudget<MonotonicClock> {
    /// Creates a budget of `total`; `None` means there is no deadline.
    #[must_use]
    pub const fn new(total: Option<Duration>) -> Self {
        Self::with_clock(total, MonotonicClock)
    }
}

impl<C: Clock> TimeoutBudget<C> {
    /// Creates a budget reading time from `clock`.
    #[must_use]
    pub const fn with_clock(total: Option<Duration>, clock: C) -> Self {
        Self {
            total,
            allow_negative: false,
            start: Cell::new(None),
            clock,
        }
    }

    /// Reports [`Remaining::Overdue`] instead of clamping to zero once the
    /// deadline has passed.
    #[must_use]
    pub const fn allow_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }

    /// Configured total, if any.
    #[must_use]
    pub const fn total(&self) -> Option<Duration> {
        self.total
    }

    /// Starts the countdown now unless it is already running.
    pub fn start(&self) {
        if self.start.get().is_none() {
            self.start.set(Some(self.clock.now()));
        }
    }

    /// Time left before the deadline, or `None` when there is no deadline.
    ///
    /// The first call fixes the start instant.
    pub fn remaining(&self) -> Option<Remaining> {
        let total = self.total?;
        let now = self.clock.now();
        let start = match self.start.get() {
            Some(start) => start,
            None => {
                self.start.set(Some(now));
                now
            }
        };
        let elapsed = now.saturating_duration_since(start);
        let remaining = match total.checked_sub(elapsed) {
            Some(left) => Remaining::Left(left),
            None if self.allow_negative => Remaining::Overdue(elapsed.saturating_sub(total)),
            None => Remaining::Left(Duration::ZERO),
        };
        Some(remaining)
    }

    /// Forgets the start instant so the next [`remaining`](Self::remaining)
    /// call starts a fresh countdown.
    pub fn reset(&self) {
        self.start.set(None);
    }
}
