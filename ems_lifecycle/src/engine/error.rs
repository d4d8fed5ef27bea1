//! Engine error types.

use std::fmt;

use heapless::Vec as HVec;
use thiserror::Error;

use crate::context::CommandError;

// ─── Handler Errors ─────────────────────────────────────────────────

/// Failure raised by a handler hook or step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A command sink refused a write.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The equipment reported something the handler cannot work with.
    #[error("device error: {0}")]
    Device(String),

    /// The component is missing configuration the handler needs.
    #[error("misconfigured: {0}")]
    Misconfigured(String),
}

// ─── Build Errors ───────────────────────────────────────────────────

/// Handler table could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError<S: fmt::Debug> {
    /// No handler registered for a state of the enumeration.
    #[error("no handler registered for state {0:?}")]
    MissingHandler(S),

    /// More than one handler registered for a state.
    #[error("more than one handler registered for state {0:?}")]
    DuplicateHandler(S),
}

// ─── Run Errors ─────────────────────────────────────────────────────

/// Where inside a single `run` a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSite {
    /// `run_and_get_next_state` of the current state.
    Run,
    /// `on_exit` of the state being left.
    Exit,
    /// `on_entry` of the state being entered.
    Entry,
}

impl FailureSite {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Exit => "on_exit",
            Self::Entry => "on_entry",
        }
    }
}

impl fmt::Display for FailureSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{site} of {state:?} failed: {error}")]
pub struct StepFailure<S: fmt::Debug> {
    pub site: FailureSite,
    /// The state whose handler failed.
    pub state: S,
    pub error: HandlerError,
}

/// Every failure from one `run`, in call order.
///
/// A single run touches at most three call sites (run, exit, entry), so the
/// first failure is the primary and at most two more are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError<S: fmt::Debug> {
    primary: StepFailure<S>,
    secondary: HVec<StepFailure<S>, 2>,
}

impl<S: fmt::Debug> RunError<S> {
    pub(crate) fn new(primary: StepFailure<S>) -> Self {
        Self {
            primary,
            secondary: HVec::new(),
        }
    }

    pub(crate) fn attach(&mut self, failure: StepFailure<S>) {
        // Capacity matches the number of call sites in a run.
        let _ = self.secondary.push(failure);
    }

    /// First failure of the run.
    #[inline]
    pub fn primary(&self) -> &StepFailure<S> {
        &self.primary
    }

    /// Later failures of the same run.
    #[inline]
    pub fn secondary(&self) -> &[StepFailure<S>] {
        &self.secondary
    }

    /// All failures in call order.
    pub fn failures(&self) -> impl Iterator<Item = &StepFailure<S>> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    /// Number of failed call sites (1..=3).
    pub fn len(&self) -> usize {
        1 + self.secondary.len()
    }

    /// Whether the failure at `site` is part of this error.
    pub fn contains(&self, site: FailureSite) -> bool {
        self.failures().any(|f| f.site == site)
    }
}

impl<S: fmt::Debug> fmt::Display for RunError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for failure in &self.secondary {
            write!(f, "; also {failure}")?;
        }
        Ok(())
    }
}

impl<S: fmt::Debug> std::error::Error for RunError<S> {}
