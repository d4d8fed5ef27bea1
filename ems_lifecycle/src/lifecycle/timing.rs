//! Step and debounce timing for bring-up sub-state machines.
//!
//! Handlers never sleep. A multi-second physical operation is a sequence of
//! steps, each re-evaluated once per cycle against the cycle's `now`.

use std::time::{Duration, Instant};

// ─── Step Timer ─────────────────────────────────────────────────────

/// Current step of a sub-state machine and when it began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimer<T: Copy> {
    step: T,
    since: Instant,
}

impl<T: Copy + PartialEq> StepTimer<T> {
    pub const fn start(step: T, now: Instant) -> Self {
        Self { step, since: now }
    }

    #[inline]
    pub const fn step(&self) -> T {
        self.step
    }

    /// Move to `next`. The step clock restarts only if the step changes.
    pub fn advance(&mut self, next: T, now: Instant) {
        if next != self.step {
            self.step = next;
            self.since = now;
        }
    }

    /// Time spent in the current step.
    #[inline]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.since)
    }

    /// Whether the current step has lasted at least `timeout`.
    #[inline]
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.elapsed(now) >= timeout
    }
}

// ─── Debounce ───────────────────────────────────────────────────────

/// Timing of a debounced wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTiming {
    /// Nothing is evaluated until this long after arming.
    pub dead_time: Duration,
    /// The predicate must hold continuously for this long.
    pub settle: Duration,
    /// Give up this long after arming.
    pub timeout: Duration,
}

/// Result of one [`Debounce::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// Keep waiting.
    Waiting,
    /// Predicate held for the whole settle window.
    Settled,
    /// Timeout elapsed first.
    TimedOut,
}

/// Debounced wait for a condition after a disruptive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    armed_at: Instant,
    holding_since: Option<Instant>,
}

impl Debounce {
    /// Start waiting at `now`.
    pub const fn arm(now: Instant) -> Self {
        Self {
            armed_at: now,
            holding_since: None,
        }
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    /// Evaluate one cycle.
    ///
    /// Readings during the dead-time are ignored. A false reading restarts
    /// the settle window. The timeout is measured from arming and wins.
    pub fn poll(&mut self, now: Instant, holds: bool, timing: &DebounceTiming) -> DebounceOutcome {
        let elapsed = now.saturating_duration_since(self.armed_at);
        if elapsed >= timing.timeout {
            return DebounceOutcome::TimedOut;
        }
        if elapsed < timing.dead_time || !holds {
            self.holding_since = None;
            return DebounceOutcome::Waiting;
        }

        let since = *self.holding_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= timing.settle {
            DebounceOutcome::Settled
        } else {
            DebounceOutcome::Waiting
        }
    }
}
