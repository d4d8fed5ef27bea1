//! Battery inverter with wake/sleep signalling and grid-mode selection.
//!
//! ```text
//! GO_RUNNING:  WakeUp ─▶ SetGridMode ─▶ StartInverter ─▶ Finished
//! ```
//!
//! Each step issues its command every cycle and waits for the inverter to
//! confirm it; a step that is not confirmed within `step_timeout` sends the
//! lifecycle to ERROR. While RUNNING the inverter is put to sleep after the
//! setpoint has been zero for `power_saving_delay` and woken again on the
//! first non-zero setpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ems_common::lifecycle::config::BatteryInverterConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{GridMode, LifecycleState, StartStop};
use tracing::{debug, info, warn};

use crate::component::Lifecycle;
use crate::context::{Context, PublishedStatus, WriteChannel};
use crate::device::DeviceError;
use crate::engine::{HandlerError, StateHandler, StateMachine};
use crate::lifecycle::{ErrorHandler, LifecycleContext, StepTimer, StoppedHandler, UndefinedHandler};

// ─── I/O ────────────────────────────────────────────────────────────

/// Operating state reported by the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverterState {
    /// Powered down, not reachable for commands other than wake.
    Off,
    /// Low-power sleep.
    Sleeping,
    /// Awake, not switching.
    Standby,
    /// Switching, following the power setpoint.
    Running,
    /// Internal fault.
    Fault,
}

impl InverterState {
    /// Awake and ready for configuration commands.
    pub const fn is_awake(self) -> bool {
        matches!(self, Self::Standby | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InverterReadings {
    pub state: Option<InverterState>,
    pub grid_mode: Option<GridMode>,
    pub faulted: bool,
    /// Switched to local control; the inverter refuses remote setpoints.
    pub local_control: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InverterCommands {
    /// `true` wakes the inverter, `false` sends it to sleep.
    pub wake: Option<bool>,
    pub grid_mode: Option<GridMode>,
    /// `true` starts switching, `false` stops.
    pub run: Option<bool>,
    pub active_power_w: Option<i32>,
}

// ─── Context ────────────────────────────────────────────────────────

pub struct InverterContext {
    id: Arc<str>,
    now: Instant,
    target: StartStop,
    grid_mode: GridMode,
    setpoint_w: i32,
    readings: InverterReadings,
    status: PublishedStatus,
    wake: WriteChannel<bool>,
    grid_mode_cmd: WriteChannel<GridMode>,
    run: WriteChannel<bool>,
    active_power: WriteChannel<i32>,
}

impl Context for InverterContext {
    fn component_id(&self) -> &str {
        &self.id
    }
}

impl LifecycleContext for InverterContext {
    fn now(&self) -> Instant {
        self.now
    }

    fn target(&self) -> StartStop {
        self.target
    }

    fn is_faulted(&self) -> bool {
        self.readings.faulted || self.readings.state == Some(InverterState::Fault)
    }

    fn status(&self) -> &PublishedStatus {
        &self.status
    }
}

// ─── GO_RUNNING ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartStep {
    WakeUp,
    SetGridMode,
    StartInverter,
    Finished,
}

impl StartStep {
    const fn name(self) -> &'static str {
        match self {
            Self::WakeUp => "WakeUp",
            Self::SetGridMode => "SetGridMode",
            Self::StartInverter => "StartInverter",
            Self::Finished => "Finished",
        }
    }
}

struct GoRunningHandler {
    step_timeout: Duration,
    step: Option<StepTimer<StartStep>>,
}

impl GoRunningHandler {
    fn next_step(ctx: &InverterContext, step: StartStep) -> Result<StartStep, HandlerError> {
        let state = ctx.readings.state;
        Ok(match step {
            StartStep::WakeUp => {
                ctx.wake.issue(true)?;
                if state.is_some_and(InverterState::is_awake) {
                    StartStep::SetGridMode
                } else {
                    StartStep::WakeUp
                }
            }
            StartStep::SetGridMode => {
                ctx.grid_mode_cmd.issue(ctx.grid_mode)?;
                if ctx.readings.grid_mode == Some(ctx.grid_mode) {
                    StartStep::StartInverter
                } else {
                    StartStep::SetGridMode
                }
            }
            StartStep::StartInverter => {
                ctx.run.issue(true)?;
                if state == Some(InverterState::Running) {
                    StartStep::Finished
                } else {
                    StartStep::StartInverter
                }
            }
            StartStep::Finished => StartStep::Finished,
        })
    }
}

impl StateHandler<LifecycleState, InverterContext> for GoRunningHandler {
    fn on_entry(&mut self, ctx: &InverterContext) -> Result<(), HandlerError> {
        self.step = Some(StepTimer::start(StartStep::WakeUp, ctx.now));
        info!(
            component = ctx.component_id(),
            grid_mode = ?ctx.grid_mode,
            "starting inverter"
        );
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &InverterContext,
    ) -> Result<LifecycleState, HandlerError> {
        let now = ctx.now;
        let mut timer = match self.step {
            Some(timer) => timer,
            None => StepTimer::start(StartStep::WakeUp, now),
        };

        if timer.timed_out(now, self.step_timeout) {
            warn!(
                component = ctx.component_id(),
                step = timer.step().name(),
                timeout_s = self.step_timeout.as_secs(),
                "inverter start step timed out"
            );
            ctx.status.raise(StatusFlags::START_TIMEOUT);
            self.step = Some(timer);
            return Ok(LifecycleState::Error);
        }

        let next = Self::next_step(ctx, timer.step())?;
        if next != timer.step() {
            debug!(
                component = ctx.component_id(),
                from = timer.step().name(),
                to = next.name(),
                "start step"
            );
        }
        timer.advance(next, now);
        self.step = Some(timer);

        if next == StartStep::Finished {
            ctx.status.clear(StatusFlags::START_TIMEOUT);
            return Ok(LifecycleState::Running);
        }
        Ok(LifecycleState::GoRunning)
    }

    fn sub_state(&self) -> Option<&'static str> {
        self.step.map(|timer| timer.step().name())
    }
}

// ─── RUNNING ────────────────────────────────────────────────────────

struct RunningHandler {
    power_saving_delay: Option<Duration>,
    wake_timeout: Duration,
    zero_since: Option<Instant>,
    sleeping: bool,
    /// Set when leaving power saving until the inverter reports running.
    waking_since: Option<Instant>,
}

impl RunningHandler {
    /// Update the power-saving sub-mode. Returns whether the inverter
    /// should be asleep this cycle.
    fn power_saving(&mut self, ctx: &InverterContext) -> Result<bool, HandlerError> {
        let Some(delay) = self.power_saving_delay else {
            return Ok(false);
        };

        if ctx.setpoint_w != 0 {
            self.zero_since = None;
            if self.sleeping {
                info!(component = ctx.component_id(), "leaving power saving");
                self.sleeping = false;
                self.waking_since = Some(ctx.now);
                ctx.status.clear(StatusFlags::POWER_SAVING);
            }
            return Ok(false);
        }

        let since = *self.zero_since.get_or_insert(ctx.now);
        if !self.sleeping && ctx.now.saturating_duration_since(since) >= delay {
            info!(
                component = ctx.component_id(),
                delay_s = delay.as_secs(),
                "entering power saving"
            );
            self.sleeping = true;
            ctx.status.raise(StatusFlags::POWER_SAVING);
        }
        if self.sleeping {
            ctx.wake.issue(false)?;
        }
        Ok(self.sleeping)
    }
}

impl StateHandler<LifecycleState, InverterContext> for RunningHandler {
    fn on_entry(&mut self, ctx: &InverterContext) -> Result<(), HandlerError> {
        self.zero_since = None;
        self.sleeping = false;
        self.waking_since = None;
        info!(component = ctx.component_id(), "inverter running");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &InverterContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() {
            return Ok(LifecycleState::Undefined);
        }
        if let Some(mode) = ctx.readings.grid_mode {
            if mode != ctx.grid_mode {
                warn!(
                    component = ctx.component_id(),
                    expected = ?ctx.grid_mode,
                    actual = ?mode,
                    "grid mode mismatch"
                );
                return Ok(LifecycleState::Undefined);
            }
        }

        let sleeping = self.power_saving(ctx)?;
        match ctx.readings.state {
            Some(InverterState::Off) => return Ok(LifecycleState::Undefined),
            Some(InverterState::Running) => self.waking_since = None,
            // No readback this cycle.
            None => {}
            Some(_) if sleeping => {}
            Some(state) => match self.waking_since {
                Some(since) if ctx.now.saturating_duration_since(since) < self.wake_timeout => {
                    if state == InverterState::Sleeping {
                        ctx.wake.issue(true)?;
                    }
                }
                Some(_) => {
                    warn!(
                        component = ctx.component_id(),
                        state = ?state,
                        timeout_s = self.wake_timeout.as_secs(),
                        "inverter did not wake from power saving"
                    );
                    return Ok(LifecycleState::Undefined);
                }
                None => {
                    warn!(
                        component = ctx.component_id(),
                        state = ?state,
                        "inverter stopped running"
                    );
                    return Ok(LifecycleState::Undefined);
                }
            },
        }

        if sleeping {
            ctx.active_power.issue(0)?;
        } else {
            ctx.run.issue(true)?;
            ctx.active_power.issue(ctx.setpoint_w)?;
        }
        ctx.publish(StartStop::Start);
        Ok(LifecycleState::Running)
    }

    fn on_exit(&mut self, ctx: &InverterContext) -> Result<(), HandlerError> {
        ctx.status.clear(StatusFlags::POWER_SAVING);
        Ok(())
    }

    fn sub_state(&self) -> Option<&'static str> {
        self.sleeping.then_some("PowerSaving")
    }
}

// ─── GO_STOPPED ─────────────────────────────────────────────────────

struct GoStoppedHandler;

impl StateHandler<LifecycleState, InverterContext> for GoStoppedHandler {
    fn on_entry(&mut self, ctx: &InverterContext) -> Result<(), HandlerError> {
        info!(component = ctx.component_id(), "stopping inverter");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &InverterContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() {
            return Ok(LifecycleState::Error);
        }
        ctx.active_power.issue(0)?;
        ctx.run.issue(false)?;
        match ctx.readings.state {
            Some(InverterState::Running) | None => Ok(LifecycleState::GoStopped),
            Some(_) => Ok(LifecycleState::Stopped),
        }
    }
}

// ─── Component ──────────────────────────────────────────────────────

type Handler = Box<dyn StateHandler<LifecycleState, InverterContext>>;

/// Battery inverter.
pub struct BatteryInverter {
    config: BatteryInverterConfig,
    grid_mode: GridMode,
    lifecycle: Lifecycle<InverterContext>,
}

impl BatteryInverter {
    /// Validates `config` and builds the lifecycle.
    pub fn new(config: BatteryInverterConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let step_timeout = config.step_timeout();
        let power_saving_delay = config.power_saving_delay();
        let cool_down = config.error_cool_down();
        let machine = StateMachine::new(LifecycleState::Undefined, |state| -> Handler {
            match state {
                LifecycleState::Undefined => Box::new(UndefinedHandler),
                LifecycleState::GoRunning => Box::new(GoRunningHandler {
                    step_timeout,
                    step: None,
                }),
                LifecycleState::Running => Box::new(RunningHandler {
                    power_saving_delay,
                    wake_timeout: step_timeout,
                    zero_since: None,
                    sleeping: false,
                    waking_since: None,
                }),
                LifecycleState::GoStopped => Box::new(GoStoppedHandler),
                LifecycleState::Stopped => Box::new(StoppedHandler::new(true)),
                LifecycleState::Error => Box::new(ErrorHandler::new(cool_down)),
            }
        })?;
        let lifecycle = Lifecycle::new(&config.id, config.start_stop, machine);
        Ok(Self {
            grid_mode: config.grid_mode,
            config,
            lifecycle,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn set_start_stop(&mut self, value: StartStop) {
        self.lifecycle.set_start_stop(value);
    }

    /// Select the grid mode. A change restarts the lifecycle from UNDEFINED.
    pub fn set_grid_mode(&mut self, mode: GridMode) {
        if self.grid_mode != mode {
            info!(
                component = self.id(),
                from = ?self.grid_mode,
                to = ?mode,
                "target grid mode changed"
            );
            self.grid_mode = mode;
            self.lifecycle.force_next_state(LifecycleState::Undefined);
        }
    }

    pub fn grid_mode(&self) -> GridMode {
        self.grid_mode
    }

    /// One control cycle with the requested active power [W].
    pub fn cycle(
        &mut self,
        now: Instant,
        readings: InverterReadings,
        setpoint_w: i32,
    ) -> InverterCommands {
        let ctx = InverterContext {
            id: Arc::clone(self.lifecycle.id()),
            now,
            target: self.lifecycle.target(),
            grid_mode: self.grid_mode,
            setpoint_w,
            readings,
            status: self.lifecycle.begin_cycle(),
            wake: WriteChannel::new("wake"),
            grid_mode_cmd: WriteChannel::new("grid_mode"),
            run: WriteChannel::new("run"),
            active_power: if readings.local_control {
                WriteChannel::rejecting("active_power", "inverter under local control")
            } else {
                WriteChannel::new("active_power")
            },
        };
        self.lifecycle.run(&ctx);
        InverterCommands {
            wake: ctx.wake.take(),
            grid_mode: ctx.grid_mode_cmd.take(),
            run: ctx.run.take(),
            active_power_w: ctx.active_power.take(),
        }
    }

    pub fn allows_power(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Running
    }

    pub fn lifecycle(&self) -> &Lifecycle<InverterContext> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut Lifecycle<InverterContext> {
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
