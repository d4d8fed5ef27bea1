//! Owning-component plumbing.
//!
//! [`Lifecycle`] is what a device family embeds: one lifecycle state
//! machine, the start/stop policy and the status flags that persist across
//! cycles. [`Device`] is what the cycle runner drives.

use std::sync::Arc;
use std::time::Instant;

use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{LifecycleState, StartStop, StartStopConfig};
use tracing::{debug, error};

use crate::context::PublishedStatus;
use crate::engine::{RunError, StateMachine};
use crate::lifecycle::LifecycleContext;

// ─── Lifecycle ──────────────────────────────────────────────────────

/// One device's lifecycle state machine plus its supervisory inputs.
pub struct Lifecycle<C: LifecycleContext> {
    id: Arc<str>,
    machine: StateMachine<LifecycleState, C>,
    policy: StartStopConfig,
    requested: StartStop,
    flags: StatusFlags,
    published: StartStop,
    last_failure: Option<RunError<LifecycleState>>,
}

impl<C: LifecycleContext> Lifecycle<C> {
    pub fn new(id: &str, policy: StartStopConfig, machine: StateMachine<LifecycleState, C>) -> Self {
        Self {
            id: Arc::from(id),
            machine,
            policy,
            requested: StartStop::Undefined,
            flags: StatusFlags::empty(),
            published: StartStop::Undefined,
            last_failure: None,
        }
    }

    #[inline]
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// Record the externally requested direction.
    ///
    /// A change forces UNDEFINED on the next run so the new direction is
    /// decided from scratch, whatever the current state is.
    pub fn set_start_stop(&mut self, value: StartStop) {
        if self.requested != value {
            debug!(
                component = &*self.id,
                from = ?self.requested,
                to = ?value,
                "start/stop request changed"
            );
            self.requested = value;
            self.machine.force_next_state(LifecycleState::Undefined);
        }
    }

    #[inline]
    pub fn requested(&self) -> StartStop {
        self.requested
    }

    /// Effective target after the configured policy.
    #[inline]
    pub fn target(&self) -> StartStop {
        self.policy.resolve(self.requested)
    }

    /// Supervisory override, consumed by the next run.
    pub fn force_next_state(&mut self, state: LifecycleState) {
        self.machine.force_next_state(state);
    }

    /// Published status for a new cycle, seeded with the persistent flags.
    pub fn begin_cycle(&self) -> PublishedStatus {
        PublishedStatus::new(self.flags - StatusFlags::RUN_FAILED)
    }

    /// Run the machine once and collect the published status.
    ///
    /// Failures are logged and raise `RUN_FAILED`; they never reach the
    /// cycle runner.
    pub fn run(&mut self, ctx: &C) {
        let result = self.machine.run(ctx);

        let mut flags = ctx.status().flags();
        flags.set(StatusFlags::RUN_FAILED, result.is_err());
        self.flags = flags;
        self.published = ctx.status().start_stop();

        match result {
            Ok(()) => self.last_failure = None,
            Err(err) => {
                error!(
                    component = &*self.id,
                    state = self.machine.current_state().name(),
                    "state machine failed: {err}"
                );
                self.last_failure = Some(err);
            }
        }
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.machine.current_state()
    }

    pub fn debug_log(&self) -> String {
        self.machine.debug_log()
    }

    #[inline]
    pub fn status_flags(&self) -> StatusFlags {
        self.flags
    }

    /// Coarse status published by the last run.
    #[inline]
    pub fn published(&self) -> StartStop {
        self.published
    }

    /// Failures of the last run, if it failed.
    pub fn last_failure(&self) -> Option<&RunError<LifecycleState>> {
        self.last_failure.as_ref()
    }

    pub fn machine(&self) -> &StateMachine<LifecycleState, C> {
        &self.machine
    }
}

// ─── Device ─────────────────────────────────────────────────────────

/// A component the cycle runner ticks once per cycle.
pub trait Device {
    fn id(&self) -> &str;

    /// Read inputs, run the lifecycle, write outputs.
    fn tick(&mut self, now: Instant);

    fn state(&self) -> LifecycleState;

    fn status_flags(&self) -> StatusFlags;

    fn debug_log(&self) -> String;
}
