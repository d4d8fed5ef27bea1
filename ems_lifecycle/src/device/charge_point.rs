//! EV charge point with optional 1/3-phase switching.
//!
//! Bring-up enables charging and waits for the station to report ready.
//! While RUNNING the charge current follows the request; when the requested
//! phase count differs from the one the station reports, a phase switch
//! runs inside RUNNING:
//!
//! ```text
//! StopCharging ─▶ SwitchPhases ─▶ ResumeCharging ─▶ Done
//! ```
//!
//! Every step issues its command, waits out a dead-time, then needs its
//! predicate to hold for the settle window. A step that does not settle
//! before the timeout raises `PHASE_SWITCH_FAILED` and the switch carries
//! on with the next step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ems_common::lifecycle::config::ChargePointConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{LifecycleState, Phases, StartStop};
use tracing::{debug, info, warn};

use crate::component::Lifecycle;
use crate::context::{Context, PublishedStatus, WriteChannel};
use crate::device::DeviceError;
use crate::engine::{HandlerError, StateHandler, StateMachine};
use crate::lifecycle::{
    Debounce, DebounceOutcome, DebounceTiming, ErrorHandler, LifecycleContext, StoppedHandler,
    UndefinedHandler,
};

// ─── I/O ────────────────────────────────────────────────────────────

/// Charging mode reported by the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeMode {
    /// Charging disabled.
    Disabled,
    /// Enabled, vehicle not drawing current.
    Ready,
    /// Vehicle is charging.
    Charging,
    /// Station error.
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargePointReadings {
    pub mode: Option<ChargeMode>,
    pub phases: Option<Phases>,
    pub faulted: bool,
}

/// What the energy manager wants from the charge point this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Charge current [mA]; 0 pauses charging.
    pub current_ma: u32,
    pub phases: Phases,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargePointCommands {
    pub enable: Option<bool>,
    pub current_ma: Option<u32>,
    pub phases: Option<Phases>,
}

// ─── Context ────────────────────────────────────────────────────────

pub struct ChargePointContext {
    id: Arc<str>,
    now: Instant,
    target: StartStop,
    request: ChargeRequest,
    readings: ChargePointReadings,
    status: PublishedStatus,
    enable: WriteChannel<bool>,
    current: WriteChannel<u32>,
    phases: WriteChannel<Phases>,
}

impl Context for ChargePointContext {
    fn component_id(&self) -> &str {
        &self.id
    }
}

impl LifecycleContext for ChargePointContext {
    fn now(&self) -> Instant {
        self.now
    }

    fn target(&self) -> StartStop {
        self.target
    }

    fn is_faulted(&self) -> bool {
        self.readings.faulted || self.readings.mode == Some(ChargeMode::Error)
    }

    fn status(&self) -> &PublishedStatus {
        &self.status
    }
}

// ─── GO_RUNNING ─────────────────────────────────────────────────────

struct GoRunningHandler {
    start_timeout: Duration,
    since: Option<Instant>,
}

impl StateHandler<LifecycleState, ChargePointContext> for GoRunningHandler {
    fn on_entry(&mut self, ctx: &ChargePointContext) -> Result<(), HandlerError> {
        self.since = Some(ctx.now);
        info!(component = ctx.component_id(), "enabling charge point");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &ChargePointContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() {
            return Ok(LifecycleState::Error);
        }
        let since = *self.since.get_or_insert(ctx.now);
        if ctx.now.saturating_duration_since(since) >= self.start_timeout {
            warn!(
                component = ctx.component_id(),
                timeout_s = self.start_timeout.as_secs(),
                "charge point did not become ready"
            );
            ctx.status.raise(StatusFlags::START_TIMEOUT);
            return Ok(LifecycleState::Error);
        }

        ctx.enable.issue(true)?;
        match ctx.readings.mode {
            Some(ChargeMode::Ready | ChargeMode::Charging) => {
                ctx.status.clear(StatusFlags::START_TIMEOUT);
                Ok(LifecycleState::Running)
            }
            _ => Ok(LifecycleState::GoRunning),
        }
    }
}

// ─── RUNNING ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchStep {
    StopCharging,
    SwitchPhases,
    ResumeCharging,
    Done,
}

impl SwitchStep {
    const fn name(self) -> &'static str {
        match self {
            Self::StopCharging => "StopCharging",
            Self::SwitchPhases => "SwitchPhases",
            Self::ResumeCharging => "ResumeCharging",
            Self::Done => "Done",
        }
    }

    const fn next(self) -> Self {
        match self {
            Self::StopCharging => Self::SwitchPhases,
            Self::SwitchPhases => Self::ResumeCharging,
            Self::ResumeCharging | Self::Done => Self::Done,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PhaseSwitch {
    step: SwitchStep,
    target: Phases,
    debounce: Debounce,
}

struct RunningHandler {
    timing: DebounceTiming,
    min_current_ma: u32,
    max_current_ma: u32,
    switch: Option<PhaseSwitch>,
    enabled_last_cycle: bool,
}

impl RunningHandler {
    fn charge_current(&self, request: &ChargeRequest) -> u32 {
        request.current_ma.min(self.max_current_ma).max(self.min_current_ma)
    }

    fn begin_switch(&mut self, ctx: &ChargePointContext, target: Phases) {
        info!(
            component = ctx.component_id(),
            from = ?ctx.readings.phases,
            to = ?target,
            "starting phase switch"
        );
        ctx.status.clear(StatusFlags::PHASE_SWITCH_FAILED);
        ctx.status.raise(StatusFlags::PHASE_SWITCHING);
        self.switch = Some(PhaseSwitch {
            step: SwitchStep::StopCharging,
            target,
            debounce: Debounce::arm(ctx.now),
        });
    }

    /// One cycle of the phase switch. Evaluates the current step against
    /// the readings, then issues the command of the (possibly new) step.
    fn drive_switch(&mut self, ctx: &ChargePointContext) -> Result<(), HandlerError> {
        let current_ma = self.charge_current(&ctx.request);
        let Some(switch) = self.switch.as_mut() else {
            return Ok(());
        };

        let mode = ctx.readings.mode;
        let holds = match switch.step {
            SwitchStep::StopCharging => mode.is_some_and(|m| m != ChargeMode::Charging),
            SwitchStep::SwitchPhases => ctx.readings.phases == Some(switch.target),
            SwitchStep::ResumeCharging => mode == Some(ChargeMode::Charging),
            SwitchStep::Done => true,
        };

        let advance = match switch.debounce.poll(ctx.now, holds, &self.timing) {
            DebounceOutcome::Waiting => false,
            DebounceOutcome::Settled => true,
            DebounceOutcome::TimedOut => {
                warn!(
                    component = ctx.component_id(),
                    step = switch.step.name(),
                    timeout_s = self.timing.timeout.as_secs(),
                    "phase switch step timed out"
                );
                ctx.status.raise(StatusFlags::PHASE_SWITCH_FAILED);
                true
            }
        };
        if advance {
            let next = switch.step.next();
            debug!(
                component = ctx.component_id(),
                from = switch.step.name(),
                to = next.name(),
                "phase switch step"
            );
            switch.step = next;
            switch.debounce = Debounce::arm(ctx.now);
        }

        match switch.step {
            SwitchStep::StopCharging => {
                ctx.enable.issue(false)?;
            }
            SwitchStep::SwitchPhases => {
                ctx.enable.issue(false)?;
                ctx.phases.issue(switch.target)?;
            }
            SwitchStep::ResumeCharging => {
                ctx.enable.issue(true)?;
                ctx.current.issue(current_ma)?;
            }
            SwitchStep::Done => {
                info!(component = ctx.component_id(), "phase switch finished");
                self.switch = None;
                ctx.status.clear(StatusFlags::PHASE_SWITCHING);
                self.apply_request(ctx)?;
            }
        }
        Ok(())
    }

    fn apply_request(&self, ctx: &ChargePointContext) -> Result<(), HandlerError> {
        if ctx.request.current_ma == 0 {
            ctx.enable.issue(false)?;
        } else {
            ctx.enable.issue(true)?;
            ctx.current.issue(self.charge_current(&ctx.request))?;
        }
        Ok(())
    }
}

impl StateHandler<LifecycleState, ChargePointContext> for RunningHandler {
    fn on_entry(&mut self, ctx: &ChargePointContext) -> Result<(), HandlerError> {
        self.switch = None;
        self.enabled_last_cycle = false;
        info!(component = ctx.component_id(), "charge point running");
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &ChargePointContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() {
            return Ok(LifecycleState::Undefined);
        }
        if self.switch.is_none()
            && self.enabled_last_cycle
            && ctx.readings.mode == Some(ChargeMode::Disabled)
        {
            warn!(component = ctx.component_id(), "charge point disabled externally");
            return Ok(LifecycleState::Undefined);
        }

        if self.switch.is_none() && ctx.phases.is_configured() {
            if let Some(actual) = ctx.readings.phases {
                if actual != ctx.request.phases {
                    self.begin_switch(ctx, ctx.request.phases);
                }
            }
        }

        if self.switch.is_some() {
            self.drive_switch(ctx)?;
        } else {
            self.apply_request(ctx)?;
        }

        self.enabled_last_cycle = self.switch.is_none() && ctx.enable.next_value() == Some(true);
        ctx.publish(StartStop::Start);
        Ok(LifecycleState::Running)
    }

    fn on_exit(&mut self, ctx: &ChargePointContext) -> Result<(), HandlerError> {
        if self.switch.take().is_some() {
            ctx.status.clear(StatusFlags::PHASE_SWITCHING);
        }
        Ok(())
    }

    fn sub_state(&self) -> Option<&'static str> {
        self.switch.map(|s| s.step.name())
    }
}

// ─── GO_STOPPED ─────────────────────────────────────────────────────

struct GoStoppedHandler;

impl StateHandler<LifecycleState, ChargePointContext> for GoStoppedHandler {
    fn run_and_get_next_state(
        &mut self,
        ctx: &ChargePointContext,
    ) -> Result<LifecycleState, HandlerError> {
        if ctx.is_faulted() {
            return Ok(LifecycleState::Error);
        }
        ctx.enable.issue(false)?;
        match ctx.readings.mode {
            Some(ChargeMode::Disabled) => Ok(LifecycleState::Stopped),
            _ => Ok(LifecycleState::GoStopped),
        }
    }
}

// ─── Component ──────────────────────────────────────────────────────

type Handler = Box<dyn StateHandler<LifecycleState, ChargePointContext>>;

/// EV charge point.
pub struct ChargePoint {
    config: ChargePointConfig,
    lifecycle: Lifecycle<ChargePointContext>,
}

impl ChargePoint {
    /// Validates `config` and builds the lifecycle.
    pub fn new(config: ChargePointConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let timing = DebounceTiming {
            dead_time: config.phase_switch_dead_time(),
            settle: config.phase_switch_settle(),
            timeout: config.phase_switch_timeout(),
        };
        let start_timeout = config.start_timeout();
        let cool_down = config.error_cool_down();
        let (min_current_ma, max_current_ma) = (config.min_current_ma, config.max_current_ma);

        let machine = StateMachine::new(LifecycleState::Undefined, |state| -> Handler {
            match state {
                LifecycleState::Undefined => Box::new(UndefinedHandler),
                LifecycleState::GoRunning => Box::new(GoRunningHandler {
                    start_timeout,
                    since: None,
                }),
                LifecycleState::Running => Box::new(RunningHandler {
                    timing,
                    min_current_ma,
                    max_current_ma,
                    switch: None,
                    enabled_last_cycle: false,
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
    pub fn cycle(
        &mut self,
        now: Instant,
        readings: ChargePointReadings,
        request: ChargeRequest,
    ) -> ChargePointCommands {
        let ctx = ChargePointContext {
            id: Arc::clone(self.lifecycle.id()),
            now,
            target: self.lifecycle.target(),
            request,
            readings,
            status: self.lifecycle.begin_cycle(),
            enable: WriteChannel::new("enable"),
            current: WriteChannel::new("current"),
            phases: WriteChannel::bound("phases", self.config.phase_switching),
        };
        self.lifecycle.run(&ctx);
        ChargePointCommands {
            enable: ctx.enable.take(),
            current_ma: ctx.current.take(),
            phases: ctx.phases.take(),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle<ChargePointContext> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut Lifecycle<ChargePointContext> {
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

    fn config() -> ChargePointConfig {
        ChargePointConfig {
            id: "evcs0".into(),
            start_stop: StartStopConfig::Start,
            phase_switching: true,
            min_current_ma: 6000,
            max_current_ma: 16000,
            start_timeout_s: 60,
            phase_switch_dead_time_s: 30,
            phase_switch_settle_s: 1,
            phase_switch_timeout_s: 600,
            error_cool_down_s: 120,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn reading(mode: ChargeMode, phases: Phases) -> ChargePointReadings {
        ChargePointReadings {
            mode: Some(mode),
            phases: Some(phases),
            faulted: false,
        }
    }

    fn request(current_ma: u32, phases: Phases) -> ChargeRequest {
        ChargeRequest { current_ma, phases }
    }

    fn running(cp: &mut ChargePoint, t0: Instant) -> Instant {
        let ready = reading(ChargeMode::Ready, Phases::Three);
        cp.cycle(t0, ready, request(8000, Phases::Three));
        cp.cycle(t0 + secs(1), ready, request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::Running);
        t0 + secs(2)
    }

    #[test]
    fn inverted_current_range_is_rejected() {
        let mut cfg = config();
        cfg.min_current_ma = 16000;
        cfg.max_current_ma = 6000;
        assert!(matches!(
            ChargePoint::new(cfg),
            Err(DeviceError::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn bring_up_waits_for_ready() {
        let t0 = Instant::now();
        let mut cp = ChargePoint::new(config()).unwrap();
        let disabled = reading(ChargeMode::Disabled, Phases::Three);

        cp.cycle(t0, disabled, request(8000, Phases::Three));
        let cmd = cp.cycle(t0 + secs(1), disabled, request(8000, Phases::Three));
        assert_eq!(cmd.enable, Some(true));
        assert_eq!(cp.state(), LifecycleState::GoRunning);

        cp.cycle(t0 + secs(2), reading(ChargeMode::Ready, Phases::Three), request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::Running);
    }

    #[test]
    fn bring_up_timeout() {
        let t0 = Instant::now();
        let mut cp = ChargePoint::new(config()).unwrap();
        let disabled = reading(ChargeMode::Disabled, Phases::Three);
        cp.cycle(t0, disabled, request(8000, Phases::Three));
        cp.cycle(t0 + secs(59), disabled, request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::GoRunning);
        cp.cycle(t0 + secs(60), disabled, request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::Error);
        assert!(cp.status_flags().contains(StatusFlags::START_TIMEOUT));
    }

    #[test]
    fn current_is_clamped_and_zero_pauses() {
        let mut cp = ChargePoint::new(config()).unwrap();
        let t = running(&mut cp, Instant::now());
        let charging = reading(ChargeMode::Charging, Phases::Three);

        let cmd = cp.cycle(t, charging, request(40_000, Phases::Three));
        assert_eq!(cmd.enable, Some(true));
        assert_eq!(cmd.current_ma, Some(16_000));

        let cmd = cp.cycle(t + secs(1), charging, request(1000, Phases::Three));
        assert_eq!(cmd.current_ma, Some(6000));

        let cmd = cp.cycle(t + secs(2), charging, request(0, Phases::Three));
        assert_eq!(cmd.enable, Some(false));
        assert_eq!(cmd.current_ma, None);
        assert_eq!(cp.state(), LifecycleState::Running);
        assert_eq!(cp.lifecycle().published(), StartStop::Start);
    }

    #[test]
    fn external_disable_leaves_running() {
        let mut cp = ChargePoint::new(config()).unwrap();
        let t = running(&mut cp, Instant::now());
        cp.cycle(t, reading(ChargeMode::Charging, Phases::Three), request(8000, Phases::Three));
        cp.cycle(t + secs(1), reading(ChargeMode::Disabled, Phases::Three), request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::Undefined);
    }

    #[test]
    fn debounced_phase_switch() {
        let mut cp = ChargePoint::new(config()).unwrap();
        let t = running(&mut cp, Instant::now());
        let single = request(8000, Phases::Single);

        // Disruptive command at T.
        let cmd = cp.cycle(t, reading(ChargeMode::Charging, Phases::Three), single);
        assert_eq!(cmd.enable, Some(false));
        assert_eq!(cp.debug_log(), "Running-StopCharging");
        assert!(cp.status_flags().contains(StatusFlags::PHASE_SWITCHING));

        let stopped = reading(ChargeMode::Ready, Phases::Three);
        cp.cycle(t + secs(29), stopped, single);
        assert_eq!(cp.debug_log(), "Running-StopCharging");
        cp.cycle(t + secs(30), stopped, single);
        assert_eq!(cp.debug_log(), "Running-StopCharging");
        let cmd = cp.cycle(t + secs(31), stopped, single);
        assert_eq!(cp.debug_log(), "Running-SwitchPhases");
        assert_eq!(cmd.phases, Some(Phases::Single));
        assert_eq!(cmd.enable, Some(false));

        let switched = reading(ChargeMode::Ready, Phases::Single);
        cp.cycle(t + secs(61), switched, single);
        let cmd = cp.cycle(t + secs(62), switched, single);
        assert_eq!(cp.debug_log(), "Running-ResumeCharging");
        assert_eq!(cmd.enable, Some(true));
        assert_eq!(cmd.current_ma, Some(8000));

        let charging = reading(ChargeMode::Charging, Phases::Single);
        cp.cycle(t + secs(92), charging, single);
        let cmd = cp.cycle(t + secs(93), charging, single);
        assert_eq!(cp.debug_log(), "Running");
        assert_eq!(cmd.enable, Some(true));
        assert!(!cp.status_flags().contains(StatusFlags::PHASE_SWITCHING));
        assert!(!cp.status_flags().contains(StatusFlags::PHASE_SWITCH_FAILED));
        assert_eq!(cp.state(), LifecycleState::Running);
    }

    #[test]
    fn phase_switch_timeout_falls_through() {
        let mut cp = ChargePoint::new(config()).unwrap();
        let t = running(&mut cp, Instant::now());
        let single = request(8000, Phases::Single);
        let stuck = reading(ChargeMode::Charging, Phases::Three);

        cp.cycle(t, stuck, single);
        cp.cycle(t + secs(599), stuck, single);
        assert_eq!(cp.debug_log(), "Running-StopCharging");
        assert!(!cp.status_flags().contains(StatusFlags::PHASE_SWITCH_FAILED));

        let cmd = cp.cycle(t + secs(600), stuck, single);
        assert_eq!(cp.debug_log(), "Running-SwitchPhases");
        assert_eq!(cmd.phases, Some(Phases::Single));
        assert!(cp.status_flags().contains(StatusFlags::PHASE_SWITCH_FAILED));
        assert_eq!(cp.state(), LifecycleState::Running);
    }

    #[test]
    fn no_phase_switch_without_contactor() {
        let mut cfg = config();
        cfg.phase_switching = false;
        let mut cp = ChargePoint::new(cfg).unwrap();
        let t = running(&mut cp, Instant::now());

        let cmd = cp.cycle(t, reading(ChargeMode::Charging, Phases::Three), request(8000, Phases::Single));
        assert_eq!(cp.debug_log(), "Running");
        assert_eq!(cmd.phases, None);
        assert_eq!(cmd.enable, Some(true));
    }

    #[test]
    fn stop_disables_charging() {
        let mut cfg = config();
        cfg.start_stop = StartStopConfig::Stop;
        let mut cp = ChargePoint::new(cfg).unwrap();
        let t0 = Instant::now();
        let charging = reading(ChargeMode::Charging, Phases::Three);

        cp.cycle(t0, charging, request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::GoStopped);
        let cmd = cp.cycle(t0 + secs(1), charging, request(8000, Phases::Three));
        assert_eq!(cmd.enable, Some(false));
        cp.cycle(t0 + secs(2), reading(ChargeMode::Disabled, Phases::Three), request(8000, Phases::Three));
        assert_eq!(cp.state(), LifecycleState::Stopped);
    }
}
