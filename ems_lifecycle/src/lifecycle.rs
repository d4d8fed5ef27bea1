//! Canonical device lifecycle.
//!
//! Every device family runs `StateMachine<LifecycleState, _>` with the same
//! outer shape:
//!
//! ```text
//! UNDEFINED ──▶ GO_RUNNING ──▶ RUNNING
//!     │  ▲          │             │
//!     │  └── ERROR ◀┘             │ (fault / lost)
//!     ▼                           ▼
//! GO_STOPPED ──▶ STOPPED      UNDEFINED
//! ```
//!
//! This module holds the pieces that are identical across families: the
//! UNDEFINED decision table, the STOPPED and ERROR handlers and the step
//! timing helpers used by the bring-up sub-state machines.

pub mod handlers;
pub mod timing;

use std::time::Instant;

use ems_common::lifecycle::state::{LifecycleState, StartStop};

use crate::context::{Context, PublishedStatus};
use crate::engine::State;

pub use handlers::{ErrorHandler, StoppedHandler, UndefinedHandler};
pub use timing::{Debounce, DebounceOutcome, DebounceTiming, StepTimer};

impl State for LifecycleState {
    fn all() -> &'static [Self] {
        static ALL: [LifecycleState; 6] = LifecycleState::ALL;
        &ALL
    }

    fn name(self) -> &'static str {
        LifecycleState::name(self)
    }
}

/// What every lifecycle handler needs from its context.
pub trait LifecycleContext: Context {
    /// Instant sampled once for this cycle.
    fn now(&self) -> Instant;

    /// Effective start/stop target after the configured policy.
    fn target(&self) -> StartStop;

    /// Whether the equipment reports a fault right now.
    fn is_faulted(&self) -> bool;

    /// Published status of this cycle.
    fn status(&self) -> &PublishedStatus;

    #[inline]
    fn publish(&self, value: StartStop) {
        self.status().publish(value);
    }
}

/// UNDEFINED decision table.
///
/// | faulted | target | next       |
/// |---------|--------|------------|
/// | yes     | any    | ERROR      |
/// | no      | START  | GO_RUNNING |
/// | no      | STOP   | GO_STOPPED |
/// | no      | UNDEF  | UNDEFINED  |
#[inline]
pub const fn decide(target: StartStop, faulted: bool) -> LifecycleState {
    if faulted {
        return LifecycleState::Error;
    }
    match target {
        StartStop::Start => LifecycleState::GoRunning,
        StartStop::Stop => LifecycleState::GoStopped,
        StartStop::Undefined => LifecycleState::Undefined,
    }
}
