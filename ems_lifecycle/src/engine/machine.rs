//! The state machine and its builder.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::error::{BuildError, FailureSite, HandlerError, RunError, StepFailure};
use super::handler::{State, StateHandler};
use crate::context::Context;

type HandlerBox<S, C> = Box<dyn StateHandler<S, C>>;

// ─── State Machine ──────────────────────────────────────────────────

/// Cycle-driven state machine with a complete handler table.
///
/// # Run contract
///
/// 1. A pending fail-safe reset (see step 4) moves to the initial state.
///    Otherwise a pending override (see
///    [`force_next_state`](Self::force_next_state)) is consumed and becomes
///    the next state. Either way the current handler's
///    `run_and_get_next_state` is skipped for this cycle, and an override
///    left waiting behind a reset applies on the cycle after it.
/// 2. Otherwise the current handler computes the next state. If it fails,
///    the next state is the initial state.
/// 3. If the next state equals the current one, no hooks fire.
/// 4. Otherwise `on_exit` of the current handler runs, then `on_entry` of
///    the next one, and the transition commits. Both hooks are always
///    attempted. If either fails the transition still commits and a reset
///    to the initial state is armed for the next cycle, where it runs as an
///    ordinary transition.
///
/// Every failure of the run is returned in one [`RunError`].
pub struct StateMachine<S: State, C: ?Sized> {
    initial: S,
    current: S,
    forced: Option<S>,
    reset_pending: bool,
    handlers: HashMap<S, HandlerBox<S, C>>,
}

impl<S: State, C: Context + ?Sized> StateMachine<S, C> {
    /// Build the table by calling `factory` once for every `S::all()` member.
    ///
    /// With an exhaustive `match` inside the factory, adding a state to the
    /// enumeration without a handler fails to compile.
    pub fn new<F>(initial: S, mut factory: F) -> Result<Self, BuildError<S>>
    where
        F: FnMut(S) -> HandlerBox<S, C>,
    {
        let mut builder = Self::builder(initial);
        for &state in S::all() {
            builder = builder.boxed(state, factory(state));
        }
        builder.build()
    }

    /// Fallible path: register handlers one by one.
    pub fn builder(initial: S) -> StateMachineBuilder<S, C> {
        StateMachineBuilder {
            initial,
            handlers: HashMap::with_capacity(S::all().len()),
            duplicate: None,
        }
    }

    /// Execute one cycle. See the type-level docs for the contract.
    pub fn run(&mut self, ctx: &C) -> Result<(), RunError<S>> {
        let current = self.current;
        let mut failures: Option<RunError<S>> = None;

        let pending = if std::mem::take(&mut self.reset_pending) {
            debug!(
                component = ctx.component_id(),
                state = current.name(),
                "applying fail-safe reset"
            );
            Some(self.initial)
        } else {
            self.forced.take()
        };

        let mut next = match pending {
            Some(forced) => {
                debug!(
                    component = ctx.component_id(),
                    state = current.name(),
                    forced = forced.name(),
                    "applying forced next state"
                );
                forced
            }
            None => match self.handlers.get_mut(&current) {
                Some(handler) => match handler.run_and_get_next_state(ctx) {
                    Ok(next) => next,
                    Err(error) => {
                        record(&mut failures, FailureSite::Run, current, error);
                        self.initial
                    }
                },
                None => {
                    record(&mut failures, FailureSite::Run, current, unknown_state(current));
                    self.initial
                }
            },
        };

        if !self.handlers.contains_key(&next) {
            record(&mut failures, FailureSite::Run, current, unknown_state(next));
            next = self.initial;
        }

        if next != current {
            let mut hook_failed = false;

            if let Some(handler) = self.handlers.get_mut(&current) {
                if let Err(error) = handler.on_exit(ctx) {
                    record(&mut failures, FailureSite::Exit, current, error);
                    hook_failed = true;
                }
            }
            if let Some(handler) = self.handlers.get_mut(&next) {
                if let Err(error) = handler.on_entry(ctx) {
                    record(&mut failures, FailureSite::Entry, next, error);
                    hook_failed = true;
                }
            }

            self.current = next;
            debug!(
                component = ctx.component_id(),
                from = current.name(),
                to = next.name(),
                "state transition"
            );

            if hook_failed && next != self.initial {
                self.reset_pending = true;
            }
        }

        match failures {
            None => Ok(()),
            Some(err) => {
                warn!(
                    component = ctx.component_id(),
                    state = self.current.name(),
                    failures = err.len(),
                    "state machine run failed: {err}"
                );
                Err(err)
            }
        }
    }
}

impl<S: State, C: ?Sized> StateMachine<S, C> {
    /// Override the next state. Consumed by the next `run`; a later call
    /// before that replaces an earlier one.
    #[inline]
    pub fn force_next_state(&mut self, state: S) {
        self.forced = Some(state);
    }

    #[inline]
    pub fn current_state(&self) -> S {
        self.current
    }

    #[inline]
    pub fn initial_state(&self) -> S {
        self.initial
    }

    /// Override requested through `force_next_state` and not yet applied.
    #[inline]
    pub fn pending_override(&self) -> Option<S> {
        self.forced
    }

    /// Whether a failed hook armed a reset to the initial state.
    #[inline]
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// `"State"` or `"State-SubState"` for debug output.
    pub fn debug_log(&self) -> String {
        match self.handlers.get(&self.current).and_then(|h| h.sub_state()) {
            Some(sub) => format!("{}-{}", self.current.name(), sub),
            None => self.current.name().to_string(),
        }
    }
}

fn record<S: State>(
    slot: &mut Option<RunError<S>>,
    site: FailureSite,
    state: S,
    error: HandlerError,
) {
    let failure = StepFailure { site, state, error };
    match slot {
        Some(err) => err.attach(failure),
        None => *slot = Some(RunError::new(failure)),
    }
}

fn unknown_state<S: State>(state: S) -> HandlerError {
    HandlerError::Misconfigured(format!("no handler for state {state:?}"))
}

// ─── Builder ────────────────────────────────────────────────────────

/// Collects handlers and checks the table is complete.
pub struct StateMachineBuilder<S: State, C: ?Sized> {
    initial: S,
    handlers: HashMap<S, HandlerBox<S, C>>,
    duplicate: Option<S>,
}

impl<S: State, C: ?Sized> StateMachineBuilder<S, C> {
    /// Register the handler for `state`.
    pub fn handler<H>(self, state: S, handler: H) -> Self
    where
        H: StateHandler<S, C> + 'static,
    {
        self.boxed(state, Box::new(handler))
    }

    /// Register an already boxed handler for `state`.
    pub fn boxed(mut self, state: S, handler: HandlerBox<S, C>) -> Self {
        if self.handlers.insert(state, handler).is_some() && self.duplicate.is_none() {
            self.duplicate = Some(state);
        }
        self
    }

    /// Finish the table.
    ///
    /// Fails on the first duplicate registration, then on the first state
    /// of `S::all()` (or the initial state) without a handler.
    pub fn build(self) -> Result<StateMachine<S, C>, BuildError<S>> {
        if let Some(state) = self.duplicate {
            return Err(BuildError::DuplicateHandler(state));
        }
        if let Some(&state) = S::all().iter().find(|s| !self.handlers.contains_key(s)) {
            return Err(BuildError::MissingHandler(state));
        }
        if !self.handlers.contains_key(&self.initial) {
            return Err(BuildError::MissingHandler(self.initial));
        }
        Ok(StateMachine {
            initial: self.initial,
            current: self.initial,
            forced: None,
            reset_pending: false,
            handlers: self.handlers,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
