//! Battery with a start-up relay.
//!
//! The battery management system only takes control after the start-up
//! relay has been pulsed: close the relay, wait until BMS control is
//! reported, open the relay again, then run.
//!
//! ```text
//! GO_RUNNING:  WaitForSwitchOn ─▶ WaitForBmsControl ─▶ WaitForSwitchOff ─▶ Finished
//! ```
//!
//! Batteries of this kind have no controlled stop: GO_STOPPED warns and
//! stays until the target changes again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ems_common::lifecycle::config::BatteryConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{LifecycleState, StartStop};
use tracing::{debug, info, warn};

use crate::component::Lifecycle;
use crate::context::{Context, PublishedStatus, WriteChannel};
use crate::device::DeviceError;
use crate::engine::{HandlerError, StateHandler, StateMachine};
use crate::lifecycle::{ErrorHandler, LifecycleContext, StepTimer, StoppedHandler, UndefinedHandler};

// ─── I/O ────────────────────────────────────────────────────────────

/// Latest battery readings. `None` means the value has not been read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryReadings {
    /// BMS reports it is in control of the contactors.
    pub bms_control: Option<bool>,
    /// Sensed position of the start-up relay.
    pub start_up_relay: Option<bool>,
    pub faulted: bool,
}

/// Writes produced by one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryCommands {
    pub start_up_relay: Option<bool>,
}

// ─── Context ────────────────────────────────────────────────────────

pub struct BatteryContext {
    id: Arc<str>,
    now: Instant,
    target: StartStop,
    readings: BatteryReadings,
    status: PublishedStatus,
    start_up_relay: WriteChannel<bool>,
}

impl Context for BatteryContext {
    fn component_id(&self) -> &str {
        &self.id
    }
}

impl LifecycleContext for BatteryContext {
    fn now(&self) -> Instant {
        self.now
    }

    fn target(&self) -> StartStop {
        self.target
    }

    fn is_faulted(&self) -> bool {
        self.readings.faulted
    }

    fn status(&self) -> &PublishedStatus {
        &self.status
    }
}

// ─── GO_RUNNING ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartUpStep {
    WaitForSwitchOn,
    WaitForBmsControl,
    WaitForSwitchOff,
    Finished,
}

impl StartUpStep {
    const fn name(self) -> &'static str {
        match self {
            Self::WaitForSwitchOn => "WaitForSwitchOn",
            Self::WaitForBmsControl => "WaitForBmsControl",
            Self::WaitForSwitchOff => "WaitForSwitchOff",
            Self::Finished => "Finished",
        }
    }
}

struct GoRunningHandler {
    max_start_time: Duration,
    started_at: Option<Instant>,
    step: Option<StepTimer<StartUpStep>>,
    warned_unbound: bool,
}

impl GoRunningHandler {
    fn new(max_start_time: Duration) -> Self {
        Self {
            max_start_time,
            started_at: None,
            step: None,
            warned_unbound: false,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.step = Some(StepTimer::start(StartUpStep::WaitForSwitchOn, now));
        self.warned_unbound = false;
    }

    fn next_step(
        &mut self,
        ctx: &BatteryContext,
        step: StartUpStep,
    ) -> Result<StartUpStep, HandlerError> {
        let relay = &ctx.start_up_relay;
        let bms_control = ctx.readings.bms_control == Some(true);

        Ok(match step {
            StartUpStep::WaitForSwitchOn if bms_control => StartUpStep::WaitForSwitchOff,
            StartUpStep::WaitForSwitchOn if !relay.is_configured() => {
                if !self.warned_unbound {
                    warn!(
                        component = ctx.component_id(),
                        "no start-up relay configured, waiting for BMS control"
                    );
                    self.warned_unbound = true;
                }
                ctx.status.raise(StatusFlags::MISCONFIGURED);
                StartUpStep::WaitForSwitchOn
            }
            StartUpStep::WaitForSwitchOn => {
                relay.issue(true)?;
                if ctx.readings.start_up_relay == Some(true) {
                    StartUpStep::WaitForBmsControl
                } else {
                    StartUpStep::WaitForSwitchOn
                }
            }
            StartUpStep::WaitForBmsControl => {
                if bms_control {
                    relay.issue(false)?;
                    StartUpStep::WaitForSwitchOff
                } else {
                    relay.issue(true)?;
                    StartUpStep::WaitForBmsControl
                }
            }
            StartUpStep::WaitForSwitchOff => {
                if relay.is_configured() {
                    relay.issue(false)?;
                }
                match ctx.readings.start_up_relay {
                    Some(true) => StartUpStep::WaitForSwitchOff,
                    Some(false) | None => StartUpStep::Finished,
                }
            }
            StartUpStep::Finished => StartUpStep::Finished,
        })
    }
}

impl StateHandler<LifecycleState, BatteryContext> for GoRunningHandler {
    fn on_entry(&mut self, ctx: &BatteryContext) -> Result<(), HandlerError> {
        self.reset(ctx.now);
        info!(component = ctx.component_id(), "starting battery");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &BatteryContext,
    ) -> Result<LifecycleState, HandlerError> {
        let now = ctx.now;
        let started_at = *self.started_at.get_or_insert(now);
        if now.saturating_duration_since(started_at) >= self.max_start_time {
            warn!(
                component = ctx.component_id(),
                max_start_time_s = self.max_start_time.as_secs(),
                "battery start-up timed out"
            );
            ctx.status.raise(StatusFlags::START_TIMEOUT);
            return Ok(LifecycleState::Error);
        }

        let mut timer = match self.step {
            Some(timer) => timer,
            None => StepTimer::start(StartUpStep::WaitForSwitchOn, now),
        };
        let next = self.next_step(ctx, timer.step())?;
        if next != timer.step() {
            debug!(
                component = ctx.component_id(),
                from = timer.step().name(),
                to = next.name(),
                "start-up step"
            );
        }
        timer.advance(next, now);
        self.step = Some(timer);

        if next == StartUpStep::Finished {
            ctx.status.clear(StatusFlags::START_TIMEOUT | StatusFlags::MISCONFIGURED);
            return Ok(LifecycleState::Running);
        }
        Ok(LifecycleState::GoRunning)
    }

    fn sub_state(&self) -> Option<&'static str> {
        self.step.map(|timer| timer.step().name())
    }
}

// ─── RUNNING ────────────────────────────────────────────────────────

struct RunningHandler;

impl StateHandler<LifecycleState, BatteryContext> for RunningHandler {
    fn on_entry(&mut self, ctx: &BatteryContext) -> Result<(), HandlerError> {
        info!(component = ctx.component_id(), "battery running");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &BatteryContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.readings.faulted || ctx.readings.bms_control == Some(false) {
            return Ok(LifecycleState::Undefined);
        }
        if ctx.start_up_relay.is_configured() && ctx.readings.start_up_relay == Some(true) {
            ctx.start_up_relay.issue(false)?;
        }
        ctx.publish(StartStop::Start);
        Ok(LifecycleState::Running)
    }
}

// ─── GO_STOPPED ─────────────────────────────────────────────────────

#[derive(Default)]
struct GoStoppedHandler {
    warned: bool,
}

impl StateHandler<LifecycleState, BatteryContext> for GoStoppedHandler {
    fn on_entry(&mut self, _ctx: &BatteryContext) -> Result<(), HandlerError> {
        self.warned = false;
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &BatteryContext,
    ) -> Result<LifecycleState, HandlerError> {
        if !self.warned {
            warn!(
                component = ctx.component_id(),
                "battery does not support a controlled stop"
            );
            self.warned = true;
        }
        ctx.status.raise(StatusFlags::STOP_NOT_SUPPORTED);
        Ok(LifecycleState::GoStopped)
    }

    fn on_exit(&mut self, ctx: &BatteryContext) -> Result<(), HandlerError> {
        ctx.status.clear(StatusFlags::STOP_NOT_SUPPORTED);
        Ok(())
    }
}

// ─── Component ──────────────────────────────────────────────────────

type Handler = Box<dyn StateHandler<LifecycleState, BatteryContext>>;

/// Relay-started battery.
pub struct Battery {
    config: BatteryConfig,
    lifecycle: Lifecycle<BatteryContext>,
}

impl Battery {
    /// Validates `config` and builds the lifecycle.
    pub fn new(config: BatteryConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let max_start_time = config.max_start_time();
        let cool_down = config.error_cool_down();
        let machine = StateMachine::new(LifecycleState::Undefined, |state| -> Handler {
            match state {
                LifecycleState::Undefined => Box::new(UndefinedHandler),
                LifecycleState::GoRunning => Box::new(GoRunningHandler::new(max_start_time)),
                LifecycleState::Running => Box::new(RunningHandler),
                LifecycleState::GoStopped => Box::new(GoStoppedHandler::default()),
                LifecycleState::Stopped => Box::new(StoppedHandler::new(false)),
                LifecycleState::Error => Box::new(ErrorHandler::new(cool_down)),
            }
        })?;
        let lifecycle = Lifecycle::new(&config.id, config.start_stop, machine);
        Ok(Self { config, lifecycle })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn set_start_stop(&mut self, value: StartStop) {
        self.lifecycle.set_start_stop(value);
    }

    /// One control cycle.
    pub fn cycle(&mut self, now: Instant, readings: BatteryReadings) -> BatteryCommands {
        let ctx = BatteryContext {
            id: Arc::clone(self.lifecycle.id()),
            now,
            target: self.lifecycle.target(),
            readings,
            status: self.lifecycle.begin_cycle(),
            start_up_relay: WriteChannel::bound(
                "start_up_relay",
                self.config.start_up_relay.is_some(),
            ),
        };
        self.lifecycle.run(&ctx);
        BatteryCommands {
            start_up_relay: ctx.start_up_relay.take(),
        }
    }

    /// Charge/discharge power is only allowed while running.
    pub fn allows_power(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Running
    }

    pub fn lifecycle(&self) -> &Lifecycle<BatteryContext> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut Lifecycle<BatteryContext> {
        &mut self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn debug_log(&self) -> String {
        self.lifecycle.debug_log()
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.lifecycle.status_flags()
    }
}
