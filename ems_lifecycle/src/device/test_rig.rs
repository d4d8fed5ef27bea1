//! Cyclic charge/discharge test rig behind a precharged DC link.
//!
//! ```text
//! GO_RUNNING:  Precharge ─▶ CloseMain ─▶ OpenPrecharge ─▶ Finished
//! ```
//!
//! The precharge step closes the precharge relay and waits until the DC-link
//! voltage has stayed inside the configured band for the settle window.
//! Once running, the rig charges up to `soc_max`, then discharges down to
//! `soc_min`, and so on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ems_common::lifecycle::config::TestRigConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{LifecycleState, StartStop};
use tracing::{debug, info, warn};

use crate::component::Lifecycle;
use crate::context::{Context, PublishedStatus, WriteChannel};
use crate::device::DeviceError;
use crate::engine::{HandlerError, StateHandler, StateMachine};
use crate::lifecycle::{
    Debounce, DebounceOutcome, DebounceTiming, ErrorHandler, LifecycleContext, StepTimer,
    StoppedHandler, UndefinedHandler,
};

// ─── I/O ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TestRigReadings {
    pub dc_link_v: Option<f32>,
    pub main_closed: Option<bool>,
    pub precharge_closed: Option<bool>,
    /// State of charge [%].
    pub soc: Option<u8>,
    pub faulted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestRigCommands {
    pub precharge: Option<bool>,
    pub main: Option<bool>,
    /// Power setpoint [W]; negative charges.
    pub power_w: Option<i32>,
}

// ─── Context ────────────────────────────────────────────────────────

pub struct TestRigContext {
    id: Arc<str>,
    now: Instant,
    target: StartStop,
    readings: TestRigReadings,
    status: PublishedStatus,
    precharge: WriteChannel<bool>,
    main: WriteChannel<bool>,
    power: WriteChannel<i32>,
}

impl Context for TestRigContext {
    fn component_id(&self) -> &str {
        &self.id
    }
}

impl LifecycleContext for TestRigContext {
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
enum PrechargeStep {
    Precharge,
    CloseMain,
    OpenPrecharge,
    Finished,
}

impl PrechargeStep {
    const fn name(self) -> &'static str {
        match self {
            Self::Precharge => "Precharge",
            Self::CloseMain => "CloseMain",
            Self::OpenPrecharge => "OpenPrecharge",
            Self::Finished => "Finished",
        }
    }
}

struct GoRunningHandler {
    band: (f32, f32),
    precharge_timing: DebounceTiming,
    step_timeout: Duration,
    step: Option<StepTimer<PrechargeStep>>,
    voltage: Option<Debounce>,
}

impl GoRunningHandler {
    fn in_band(&self, voltage: Option<f32>) -> bool {
        voltage.is_some_and(|v| v >= self.band.0 && v <= self.band.1)
    }

    /// Returns `None` when a step timed out.
    fn next_step(
        &mut self,
        ctx: &TestRigContext,
        timer: &StepTimer<PrechargeStep>,
    ) -> Result<Option<PrechargeStep>, HandlerError> {
        let r = &ctx.readings;
        let next = match timer.step() {
            PrechargeStep::Precharge => {
                ctx.main.issue(false)?;
                ctx.precharge.issue(true)?;
                let holds = self.in_band(r.dc_link_v);
                let debounce = self.voltage.get_or_insert(Debounce::arm(ctx.now));
                match debounce.poll(ctx.now, holds, &self.precharge_timing) {
                    DebounceOutcome::Waiting => PrechargeStep::Precharge,
                    DebounceOutcome::Settled => PrechargeStep::CloseMain,
                    DebounceOutcome::TimedOut => return Ok(None),
                }
            }
            PrechargeStep::CloseMain => {
                ctx.precharge.issue(true)?;
                ctx.main.issue(true)?;
                if r.main_closed == Some(true) {
                    PrechargeStep::OpenPrecharge
                } else {
                    PrechargeStep::CloseMain
                }
            }
            PrechargeStep::OpenPrecharge => {
                ctx.main.issue(true)?;
                ctx.precharge.issue(false)?;
                if r.precharge_closed == Some(false) {
                    PrechargeStep::Finished
                } else {
                    PrechargeStep::OpenPrecharge
                }
            }
            PrechargeStep::Finished => PrechargeStep::Finished,
        };

        if next == timer.step() && timer.timed_out(ctx.now, self.step_timeout) {
            return Ok(None);
        }
        Ok(Some(next))
    }
}

impl StateHandler<LifecycleState, TestRigContext> for GoRunningHandler {
    fn on_entry(&mut self, ctx: &TestRigContext) -> Result<(), HandlerError> {
        let r = &ctx.readings;
        let first = if r.main_closed == Some(true) && r.precharge_closed == Some(false) {
            PrechargeStep::Finished
        } else {
            PrechargeStep::Precharge
        };
        self.step = Some(StepTimer::start(first, ctx.now));
        self.voltage = Some(Debounce::arm(ctx.now));
        info!(component = ctx.component_id(), step = first.name(), "starting test rig");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &TestRigContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() {
            return Ok(LifecycleState::Error);
        }
        let mut timer = match self.step {
            Some(timer) => timer,
            None => StepTimer::start(PrechargeStep::Precharge, ctx.now),
        };

        let Some(next) = self.next_step(ctx, &timer)? else {
            warn!(
                component = ctx.component_id(),
                step = timer.step().name(),
                "test rig start step timed out"
            );
            ctx.precharge.issue(false)?;
            ctx.main.issue(false)?;
            ctx.status.raise(StatusFlags::START_TIMEOUT);
            return Ok(LifecycleState::Error);
        };

        if next != timer.step() {
            debug!(
                component = ctx.component_id(),
                from = timer.step().name(),
                to = next.name(),
                "start step"
            );
        }
        timer.advance(next, ctx.now);
        self.step = Some(timer);

        if next == PrechargeStep::Finished {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Charge,
    Discharge,
}

struct RunningHandler {
    power_w: i32,
    soc_min: u8,
    soc_max: u8,
    direction: Option<Direction>,
}

impl RunningHandler {
    fn direction(&self, soc: u8) -> Direction {
        match self.direction {
            _ if soc <= self.soc_min => Direction::Charge,
            _ if soc >= self.soc_max => Direction::Discharge,
            Some(direction) => direction,
            None if u16::from(soc) < (u16::from(self.soc_min) + u16::from(self.soc_max)) / 2 => {
                Direction::Charge
            }
            None => Direction::Discharge,
        }
    }
}

impl StateHandler<LifecycleState, TestRigContext> for RunningHandler {
    fn on_entry(&mut self, ctx: &TestRigContext) -> Result<(), HandlerError> {
        self.direction = None;
        info!(component = ctx.component_id(), "test rig cycling");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &TestRigContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() || ctx.readings.main_closed == Some(false) {
            return Ok(LifecycleState::Undefined);
        }

        let power = match ctx.readings.soc {
            Some(soc) => {
                let direction = self.direction(soc);
                if self.direction != Some(direction) {
                    debug!(component = ctx.component_id(), soc, ?direction, "cycle direction");
                    self.direction = Some(direction);
                }
                match direction {
                    Direction::Charge => -self.power_w,
                    Direction::Discharge => self.power_w,
                }
            }
            None => 0,
        };
        ctx.power.issue(power)?;
        ctx.publish(StartStop::Start);
        Ok(LifecycleState::Running)
    }

    fn sub_state(&self) -> Option<&'static str> {
        self.direction.map(|d| match d {
            Direction::Charge => "Charge",
            Direction::Discharge => "Discharge",
        })
    }
}

// ─── GO_STOPPED ─────────────────────────────────────────────────────

struct GoStoppedHandler;

impl StateHandler<LifecycleState, TestRigContext> for GoStoppedHandler {
    fn run_and_get_next_state(
        &mut self,
        ctx: &TestRigContext,
    ) -> Result<LifecycleState, HandlerError> {
        ctx.power.issue(0)?;
        ctx.precharge.issue(false)?;
        ctx.main.issue(false)?;
        match ctx.readings.main_closed {
            Some(false) => Ok(LifecycleState::Stopped),
            _ => Ok(LifecycleState::GoStopped),
        }
    }
}

// ─── Component ──────────────────────────────────────────────────────

type Handler = Box<dyn StateHandler<LifecycleState, TestRigContext>>;

/// Cyclic test rig.
pub struct TestRig {
    config: TestRigConfig,
    lifecycle: Lifecycle<TestRigContext>,
}

impl TestRig {
    /// Validates `config` and builds the lifecycle.
    pub fn new(config: TestRigConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let step_timeout = config.step_timeout();
        let precharge_timing = DebounceTiming {
            dead_time: Duration::ZERO,
            settle: config.precharge_settle(),
            timeout: step_timeout,
        };
        let band = (config.precharge_min_v, config.precharge_max_v);
        let (power_w, soc_min, soc_max) = (config.power_w, config.soc_min, config.soc_max);
        let cool_down = config.error_cool_down();

        let machine = StateMachine::new(LifecycleState::Undefined, |state| -> Handler {
            match state {
                LifecycleState::Undefined => Box::new(UndefinedHandler),
                LifecycleState::GoRunning => Box::new(GoRunningHandler {
                    band,
                    precharge_timing,
                    step_timeout,
                    step: None,
                    voltage: None,
                }),
                LifecycleState::Running => Box::new(RunningHandler {
                    power_w,
                    soc_min,
                    soc_max,
                    direction: None,
                }),
                LifecycleState::GoStopped => Box::new(GoStoppedHandler),
                LifecycleState::Stopped => Box::new(StoppedHandler::new(true)),
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
    pub fn cycle(&mut self, now: Instant, readings: TestRigReadings) -> TestRigCommands {
        let ctx = TestRigContext {
            id: Arc::clone(self.lifecycle.id()),
            now,
            target: self.lifecycle.target(),
            readings,
            status: self.lifecycle.begin_cycle(),
            precharge: WriteChannel::new("precharge_relay"),
            main: WriteChannel::new("main_contactor"),
            power: WriteChannel::new("active_power"),
        };
        self.lifecycle.run(&ctx);
        TestRigCommands {
            precharge: ctx.precharge.take(),
            main: ctx.main.take(),
            power_w: ctx.power.take(),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle<TestRigContext> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut Lifecycle<TestRigContext> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use ems_common::config::ConfigError;
    use ems_common::lifecycle::state::StartStopConfig;

    fn config() -> TestRigConfig {
        TestRigConfig {
            id: "rig0".into(),
            start_stop: StartStopConfig::Start,
            power_w: 5000,
            soc_min: 10,
            soc_max: 90,
            precharge_min_v: 600.0,
            precharge_max_v: 800.0,
            precharge_settle_s: 2,
            step_timeout_s: 20,
            error_cool_down_s: 120,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn invalid_soc_window_is_rejected() {
        let mut cfg = config();
        cfg.soc_min = 200;
        cfg.soc_max = 250;
        assert!(matches!(
            TestRig::new(cfg),
            Err(DeviceError::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn initial_direction_uses_window_midpoint() {
        let handler = RunningHandler {
            power_w: 5000,
            soc_min: 200,
            soc_max: 250,
            direction: None,
        };
        assert_eq!(handler.direction(210), Direction::Charge);
        assert_eq!(handler.direction(240), Direction::Discharge);
    }

    fn open() -> TestRigReadings {
        TestRigReadings {
            dc_link_v: Some(0.0),
            main_closed: Some(false),
            precharge_closed: Some(false),
            soc: Some(50),
            faulted: false,
        }
    }

    fn closed(soc: u8) -> TestRigReadings {
        TestRigReadings {
            dc_link_v: Some(700.0),
            main_closed: Some(true),
            precharge_closed: Some(false),
            soc: Some(soc),
            faulted: false,
        }
    }

    #[test]
    fn precharge_sequence() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();

        rig.cycle(t0, open());
        assert_eq!(rig.debug_log(), "GoRunning-Precharge");

        let cmd = rig.cycle(t0 + secs(1), open());
        assert_eq!(cmd.precharge, Some(true));
        assert_eq!(cmd.main, Some(false));

        let charged = TestRigReadings {
            dc_link_v: Some(650.0),
            precharge_closed: Some(true),
            ..open()
        };
        rig.cycle(t0 + secs(2), charged);
        rig.cycle(t0 + secs(3), charged);
        assert_eq!(rig.debug_log(), "GoRunning-Precharge");
        rig.cycle(t0 + secs(4), charged);
        assert_eq!(rig.debug_log(), "GoRunning-CloseMain");

        let cmd = rig.cycle(t0 + secs(5), charged);
        assert_eq!(cmd.main, Some(true));
        assert_eq!(cmd.precharge, Some(true));

        let main_closed = TestRigReadings {
            main_closed: Some(true),
            ..charged
        };
        rig.cycle(t0 + secs(6), main_closed);
        assert_eq!(rig.debug_log(), "GoRunning-OpenPrecharge");
        let cmd = rig.cycle(t0 + secs(7), main_closed);
        assert_eq!(cmd.precharge, Some(false));

        rig.cycle(t0 + secs(8), closed(50));
        assert_eq!(rig.state(), LifecycleState::Running);
    }

    #[test]
    fn voltage_dip_restarts_settle() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();
        rig.cycle(t0, open());

        let charged = TestRigReadings {
            dc_link_v: Some(700.0),
            ..open()
        };
        let dipped = TestRigReadings {
            dc_link_v: Some(550.0),
            ..open()
        };
        rig.cycle(t0 + secs(1), charged);
        rig.cycle(t0 + secs(2), dipped);
        rig.cycle(t0 + secs(3), charged);
        rig.cycle(t0 + secs(4), charged);
        assert_eq!(rig.debug_log(), "GoRunning-Precharge");
        rig.cycle(t0 + secs(5), charged);
        assert_eq!(rig.debug_log(), "GoRunning-CloseMain");
    }

    #[test]
    fn precharge_timeout_opens_relays() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();
        rig.cycle(t0, open());
        rig.cycle(t0 + secs(19), open());
        assert_eq!(rig.state(), LifecycleState::GoRunning);

        let cmd = rig.cycle(t0 + secs(20), open());
        assert_eq!(rig.state(), LifecycleState::Error);
        assert_eq!(cmd.precharge, Some(false));
        assert_eq!(cmd.main, Some(false));
        assert!(rig.status_flags().contains(StatusFlags::START_TIMEOUT));
    }

    #[test]
    fn close_main_timeout() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();
        let charged = TestRigReadings {
            dc_link_v: Some(700.0),
            ..open()
        };
        rig.cycle(t0, charged);
        rig.cycle(t0 + secs(1), charged);
        rig.cycle(t0 + secs(3), charged);
        assert_eq!(rig.debug_log(), "GoRunning-CloseMain");

        rig.cycle(t0 + secs(22), charged);
        assert_eq!(rig.state(), LifecycleState::GoRunning);
        rig.cycle(t0 + secs(23), charged);
        assert_eq!(rig.state(), LifecycleState::Error);
    }

    #[test]
    fn already_connected_rig_skips_precharge() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();
        rig.cycle(t0, closed(50));
        assert_eq!(rig.debug_log(), "GoRunning-Finished");
        rig.cycle(t0 + secs(1), closed(50));
        assert_eq!(rig.state(), LifecycleState::Running);
    }

    #[test]
    fn cycles_between_soc_bounds() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();
        rig.cycle(t0, closed(30));
        rig.cycle(t0 + secs(1), closed(30));

        let cmd = rig.cycle(t0 + secs(2), closed(30));
        assert_eq!(cmd.power_w, Some(-5000));
        assert_eq!(rig.debug_log(), "Running-Charge");

        let cmd = rig.cycle(t0 + secs(3), closed(89));
        assert_eq!(cmd.power_w, Some(-5000));
        let cmd = rig.cycle(t0 + secs(4), closed(90));
        assert_eq!(cmd.power_w, Some(5000));
        let cmd = rig.cycle(t0 + secs(5), closed(50));
        assert_eq!(cmd.power_w, Some(5000));
        assert_eq!(rig.debug_log(), "Running-Discharge");
        let cmd = rig.cycle(t0 + secs(6), closed(10));
        assert_eq!(cmd.power_w, Some(-5000));

        let cmd = rig.cycle(t0 + secs(7), TestRigReadings { soc: None, ..closed(10) });
        assert_eq!(cmd.power_w, Some(0));
    }

    #[test]
    fn opened_main_contactor_leaves_running() {
        let t0 = Instant::now();
        let mut rig = TestRig::new(config()).unwrap();
        rig.cycle(t0, closed(50));
        rig.cycle(t0 + secs(1), closed(50));
        rig.cycle(t0 + secs(2), open());
        assert_eq!(rig.state(), LifecycleState::Undefined);
    }

    #[test]
    fn stop_opens_contactors() {
        let mut cfg = config();
        cfg.start_stop = StartStopConfig::Stop;
        let mut rig = TestRig::new(cfg).unwrap();
        let t0 = Instant::now();

        rig.cycle(t0, closed(50));
        let cmd = rig.cycle(t0 + secs(1), closed(50));
        assert_eq!(rig.state(), LifecycleState::GoStopped);
        assert_eq!(cmd.power_w, Some(0));
        assert_eq!(cmd.main, Some(false));

        rig.cycle(t0 + secs(2), open());
        assert_eq!(rig.state(), LifecycleState::Stopped);
    }
}
