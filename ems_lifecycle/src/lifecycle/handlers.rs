//! Handlers shared by every device family.

use std::time::{Duration, Instant};

use ems_common::lifecycle::state::{LifecycleState, StartStop};
use tracing::{debug, info};

use super::{LifecycleContext, decide};
use crate::engine::{HandlerError, StateHandler};

// ─── UNDEFINED ──────────────────────────────────────────────────────

/// Decides the direction from the target and the fault status.
#[derive(Debug, Default, Clone, Copy)]
pub struct UndefinedHandler;

impl<C: LifecycleContext> StateHandler<LifecycleState, C> for UndefinedHandler {
    fn run_and_get_next_state(&mut self, ctx: &C) -> Result<LifecycleState, HandlerError> {
        Ok(decide(ctx.target(), ctx.is_faulted()))
    }
}

// ─── STOPPED ────────────────────────────────────────────────────────

/// Equipment confirmed stopped.
///
/// Families that support a restart leave STOPPED as soon as the target
/// turns to START; the others wait for the supervisory force to UNDEFINED.
#[derive(Debug, Clone, Copy)]
pub struct StoppedHandler {
    restart_on_start: bool,
}

impl StoppedHandler {
    pub const fn new(restart_on_start: bool) -> Self {
        Self { restart_on_start }
    }
}

impl<C: LifecycleContext> StateHandler<LifecycleState, C> for StoppedHandler {
    fn on_entry(&mut self, ctx: &C) -> Result<(), HandlerError> {
        info!(component = ctx.component_id(), "stopped");
        Ok(())
    }

    fn run_and_get_next_state(&mut self, ctx: &C) -> Result<LifecycleState, HandlerError> {
        ctx.publish(StartStop::Stop);
        if self.restart_on_start && ctx.target() == StartStop::Start {
            return Ok(LifecycleState::Undefined);
        }
        Ok(LifecycleState::Stopped)
    }
}

// ─── ERROR ──────────────────────────────────────────────────────────

/// Cool-down after a fault or a timed-out bring-up.
///
/// Leaves for UNDEFINED once `cool_down` has elapsed since entry. The entry
/// time is reset on every entry so a repeated error restarts the window.
#[derive(Debug, Clone, Copy)]
pub struct ErrorHandler {
    cool_down: Duration,
    entered_at: Option<Instant>,
}

impl ErrorHandler {
    pub const fn new(cool_down: Duration) -> Self {
        Self {
            cool_down,
            entered_at: None,
        }
    }

    pub const fn cool_down(&self) -> Duration {
        self.cool_down
    }
}

impl<C: LifecycleContext> StateHandler<LifecycleState, C> for ErrorHandler {
    fn on_entry(&mut self, ctx: &C) -> Result<(), HandlerError> {
        self.entered_at = Some(ctx.now());
        info!(
            component = ctx.component_id(),
            cool_down_s = self.cool_down.as_secs(),
            "entering error cool-down"
        );
        Ok(())
    }

    fn run_and_get_next_state(&mut self, ctx: &C) -> Result<LifecycleState, HandlerError> {
        let now = ctx.now();
        let since = *self.entered_at.get_or_insert(now);
        if now.saturating_duration_since(since) >= self.cool_down {
            debug!(component = ctx.component_id(), "error cool-down elapsed");
            return Ok(LifecycleState::Undefined);
        }
        Ok(LifecycleState::Error)
    }

    fn on_exit(&mut self, _ctx: &C) -> Result<(), HandlerError> {
        self.entered_at = None;
        Ok(())
    }
}
