//! Simulated equipment.
//!
//! Each model reacts to the commands of the previous cycle with a fixed
//! delay, which is enough to walk every device family through its
//! bring-up sequence without hardware. [`build_devices`] pairs every
//! configured device with a model and returns them as [`Device`]s for the
//! cycle runner.

use std::time::{Duration, Instant};

use ems_common::lifecycle::config::AgentConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{GridMode, LifecycleState, Phases, StartStop};
use tracing::{debug, trace};

use crate::component::Device;
use crate::device::{
    Battery, BatteryCommands, BatteryInverter, BatteryReadings, ChargeMode, ChargePoint,
    ChargePointCommands, ChargePointReadings, ChargeRequest, DeviceError, InverterCommands,
    InverterReadings, InverterState, TestRig, TestRigCommands, TestRigReadings,
};

// ─── Delayed Value ──────────────────────────────────────────────────

/// A value that follows its commanded target after a fixed delay.
#[derive(Debug, Clone, Copy)]
struct Lagged<T> {
    value: T,
    target: T,
    changes_at: Option<Instant>,
    delay: Duration,
}

impl<T: Copy + PartialEq> Lagged<T> {
    fn new(value: T, delay: Duration) -> Self {
        Self {
            value,
            target: value,
            changes_at: None,
            delay,
        }
    }

    fn command(&mut self, target: T, now: Instant) {
        if target != self.target {
            self.target = target;
            self.changes_at = (target != self.value).then(|| now + self.delay);
        }
    }

    fn update(&mut self, now: Instant) {
        if self.changes_at.is_some_and(|at| now >= at) {
            self.value = self.target;
            self.changes_at = None;
        }
    }

    fn get(&self) -> T {
        self.value
    }
}

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

// ─── Battery ────────────────────────────────────────────────────────

/// BMS that takes control after the start-up relay was closed for 2 s.
#[derive(Debug, Clone)]
pub struct BatteryModel {
    relay: Lagged<bool>,
    relay_closed_since: Option<Instant>,
    bms_control: bool,
}

impl BatteryModel {
    const TAKE_CONTROL_AFTER: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self {
            relay: Lagged::new(false, ms(500)),
            relay_closed_since: None,
            bms_control: false,
        }
    }

    pub fn update(&mut self, now: Instant) {
        self.relay.update(now);
        if self.relay.get() {
            let since = *self.relay_closed_since.get_or_insert(now);
            if !self.bms_control && now.saturating_duration_since(since) >= Self::TAKE_CONTROL_AFTER {
                trace!("simulated BMS took control");
                self.bms_control = true;
            }
        } else {
            self.relay_closed_since = None;
        }
    }

    pub fn readings(&self) -> BatteryReadings {
        BatteryReadings {
            bms_control: Some(self.bms_control),
            start_up_relay: Some(self.relay.get()),
            faulted: false,
        }
    }

    pub fn apply(&mut self, cmd: &BatteryCommands, now: Instant) {
        if let Some(on) = cmd.start_up_relay {
            self.relay.command(on, now);
        }
    }
}

impl Default for BatteryModel {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Battery Inverter ───────────────────────────────────────────────

/// Inverter that wakes in 2 s, starts in 2 s and switches grid mode in 3 s.
#[derive(Debug, Clone)]
pub struct InverterModel {
    state: InverterState,
    pending: Option<(InverterState, Instant)>,
    grid_mode: Lagged<GridMode>,
}

impl InverterModel {
    pub fn new() -> Self {
        Self {
            state: InverterState::Off,
            pending: None,
            grid_mode: Lagged::new(GridMode::OnGrid, ms(3000)),
        }
    }

    fn schedule(&mut self, state: InverterState, at: Instant) {
        if self.pending.is_none_or(|(s, _)| s != state) {
            self.pending = Some((state, at));
        }
    }

    pub fn update(&mut self, now: Instant) {
        self.grid_mode.update(now);
        if let Some((state, at)) = self.pending {
            if now >= at {
                trace!(from = ?self.state, to = ?state, "simulated inverter state");
                self.state = state;
                self.pending = None;
            }
        }
    }

    pub fn readings(&self) -> InverterReadings {
        InverterReadings {
            state: Some(self.state),
            grid_mode: Some(self.grid_mode.get()),
            faulted: false,
            local_control: false,
        }
    }

    pub fn apply(&mut self, cmd: &InverterCommands, now: Instant) {
        use InverterState::*;

        if let Some(mode) = cmd.grid_mode {
            self.grid_mode.command(mode, now);
        }
        match (cmd.wake, self.state) {
            (Some(true), Off | Sleeping) => self.schedule(Standby, now + ms(2000)),
            (Some(false), Standby | Running) => self.schedule(Sleeping, now + ms(1000)),
            _ => {}
        }
        match (cmd.run, self.state) {
            (Some(true), Standby) => self.schedule(Running, now + ms(2000)),
            (Some(false), Running) => self.schedule(Standby, now + ms(1000)),
            _ => {}
        }
    }
}

impl Default for InverterModel {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Charge Point ───────────────────────────────────────────────────

/// Station with a plugged-in vehicle that draws current whenever enabled.
#[derive(Debug, Clone)]
pub struct ChargePointModel {
    enabled: Lagged<bool>,
    phases: Lagged<Phases>,
    current_ma: u32,
}

impl ChargePointModel {
    pub fn new() -> Self {
        Self {
            enabled: Lagged::new(false, ms(1000)),
            phases: Lagged::new(Phases::Three, ms(5000)),
            current_ma: 0,
        }
    }

    pub fn update(&mut self, now: Instant) {
        self.enabled.update(now);
        self.phases.update(now);
    }

    pub fn readings(&self) -> ChargePointReadings {
        let mode = match (self.enabled.get(), self.current_ma) {
            (false, _) => ChargeMode::Disabled,
            (true, 0) => ChargeMode::Ready,
            (true, _) => ChargeMode::Charging,
        };
        ChargePointReadings {
            mode: Some(mode),
            phases: Some(self.phases.get()),
            faulted: false,
        }
    }

    pub fn apply(&mut self, cmd: &ChargePointCommands, now: Instant) {
        if let Some(enable) = cmd.enable {
            self.enabled.command(enable, now);
            if !enable {
                self.current_ma = 0;
            }
        }
        if let Some(current) = cmd.current_ma {
            self.current_ma = current;
        }
        if let Some(phases) = cmd.phases {
            self.phases.command(phases, now);
        }
    }
}

impl Default for ChargePointModel {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Test Rig ───────────────────────────────────────────────────────

/// DC link, contactors and a 10 kWh battery.
#[derive(Debug, Clone)]
pub struct TestRigModel {
    precharge: Lagged<bool>,
    main: Lagged<bool>,
    dc_link_v: f32,
    soc: f32,
    power_w: i32,
    last_update: Option<Instant>,
}

impl TestRigModel {
    const NOMINAL_V: f32 = 720.0;
    const PRECHARGE_V_PER_S: f32 = 300.0;
    const DISCHARGE_V_PER_S: f32 = 100.0;
    const CAPACITY_WH: f32 = 10_000.0;

    pub fn new(soc: f32) -> Self {
        Self {
            precharge: Lagged::new(false, ms(500)),
            main: Lagged::new(false, ms(1000)),
            dc_link_v: 0.0,
            soc,
            power_w: 0,
            last_update: None,
        }
    }

    pub fn update(&mut self, now: Instant) {
        let dt = self
            .last_update
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f32());
        self.last_update = Some(now);
        self.precharge.update(now);
        self.main.update(now);

        if self.precharge.get() || self.main.get() {
            self.dc_link_v = (self.dc_link_v + Self::PRECHARGE_V_PER_S * dt).min(Self::NOMINAL_V);
        } else {
            self.dc_link_v = (self.dc_link_v - Self::DISCHARGE_V_PER_S * dt).max(0.0);
        }

        if self.main.get() {
            let energy_wh = self.power_w as f32 * dt / 3600.0;
            self.soc = (self.soc - energy_wh / Self::CAPACITY_WH * 100.0).clamp(0.0, 100.0);
        }
    }

    pub fn readings(&self) -> TestRigReadings {
        TestRigReadings {
            dc_link_v: Some(self.dc_link_v),
            main_closed: Some(self.main.get()),
            precharge_closed: Some(self.precharge.get()),
            soc: Some(self.soc.round() as u8),
            faulted: false,
        }
    }

    pub fn apply(&mut self, cmd: &TestRigCommands, now: Instant) {
        if let Some(on) = cmd.precharge {
            self.precharge.command(on, now);
        }
        if let Some(on) = cmd.main {
            self.main.command(on, now);
        }
        if let Some(power) = cmd.power_w {
            self.power_w = power;
        }
    }
}

// ─── Simulated Devices ──────────────────────────────────────────────

pub struct SimulatedBattery {
    pub device: Battery,
    pub model: BatteryModel,
}

impl Device for SimulatedBattery {
    fn id(&self) -> &str {
        self.device.id()
    }

    fn tick(&mut self, now: Instant) {
        self.model.update(now);
        let cmd = self.device.cycle(now, self.model.readings());
        self.model.apply(&cmd, now);
    }

    fn state(&self) -> LifecycleState {
        self.device.state()
    }

    fn status_flags(&self) -> StatusFlags {
        self.device.status_flags()
    }

    fn debug_log(&self) -> String {
        self.device.debug_log()
    }
}

/// Inverter fed with a square-wave setpoint: `setpoint_w` for one period,
/// zero for the next.
pub struct SimulatedInverter {
    pub device: BatteryInverter,
    pub model: InverterModel,
    pub setpoint_w: i32,
    pub period: Duration,
    started_at: Option<Instant>,
}

impl SimulatedInverter {
    fn setpoint(&mut self, now: Instant) -> i32 {
        let start = *self.started_at.get_or_insert(now);
        let period = self.period.as_secs().max(1);
        let elapsed = now.saturating_duration_since(start).as_secs();
        if (elapsed / period) % 2 == 0 { self.setpoint_w } else { 0 }
    }
}

impl Device for SimulatedInverter {
    fn id(&self) -> &str {
        self.device.id()
    }

    fn tick(&mut self, now: Instant) {
        self.model.update(now);
        let setpoint = self.setpoint(now);
        let cmd = self.device.cycle(now, self.model.readings(), setpoint);
        self.model.apply(&cmd, now);
    }

    fn state(&self) -> LifecycleState {
        self.device.state()
    }

    fn status_flags(&self) -> StatusFlags {
        self.device.status_flags()
    }

    fn debug_log(&self) -> String {
        self.device.debug_log()
    }
}

/// Charge point whose requested phase count alternates every period.
pub struct SimulatedChargePoint {
    pub device: ChargePoint,
    pub model: ChargePointModel,
    pub current_ma: u32,
    pub period: Duration,
    started_at: Option<Instant>,
}

impl SimulatedChargePoint {
    fn request(&mut self, now: Instant) -> ChargeRequest {
        let start = *self.started_at.get_or_insert(now);
        let period = self.period.as_secs().max(1);
        let elapsed = now.saturating_duration_since(start).as_secs();
        let phases = if (elapsed / period) % 2 == 0 {
            Phases::Three
        } else {
            Phases::Single
        };
        ChargeRequest {
            current_ma: self.current_ma,
            phases,
        }
    }
}

impl Device for SimulatedChargePoint {
    fn id(&self) -> &str {
        self.device.id()
    }

    fn tick(&mut self, now: Instant) {
        self.model.update(now);
        let request = self.request(now);
        let cmd = self.device.cycle(now, self.model.readings(), request);
        self.model.apply(&cmd, now);
    }

    fn state(&self) -> LifecycleState {
        self.device.state()
    }

    fn status_flags(&self) -> StatusFlags {
        self.device.status_flags()
    }

    fn debug_log(&self) -> String {
        self.device.debug_log()
    }
}

pub struct SimulatedTestRig {
    pub device: TestRig,
    pub model: TestRigModel,
}

impl Device for SimulatedTestRig {
    fn id(&self) -> &str {
        self.device.id()
    }

    fn tick(&mut self, now: Instant) {
        self.model.update(now);
        let cmd = self.device.cycle(now, self.model.readings());
        self.model.apply(&cmd, now);
    }

    fn state(&self) -> LifecycleState {
        self.device.state()
    }

    fn status_flags(&self) -> StatusFlags {
        self.device.status_flags()
    }

    fn debug_log(&self) -> String {
        self.device.debug_log()
    }
}

// ─── Factory ────────────────────────────────────────────────────────

/// Square-wave period of the simulated inverter setpoint.
pub const INVERTER_PROFILE_PERIOD: Duration = Duration::from_secs(300);
/// Period of the simulated phase-count request.
pub const PHASE_PROFILE_PERIOD: Duration = Duration::from_secs(900);

/// Build a simulated device for every configured one, in configuration
/// order. Every device is requested to START; a pinned policy wins.
pub fn build_devices(
    config: &AgentConfig,
) -> Result<Vec<Box<dyn Device>>, DeviceError> {
    let mut devices: Vec<Box<dyn Device>> = Vec::with_capacity(config.device_count());

    for c in &config.battery {
        let mut device = Battery::new(c.clone())?;
        device.set_start_stop(StartStop::Start);
        devices.push(Box::new(SimulatedBattery {
            device,
            model: BatteryModel::new(),
        }));
    }
    for c in &config.battery_inverter {
        let mut device = BatteryInverter::new(c.clone())?;
        device.set_start_stop(StartStop::Start);
        devices.push(Box::new(SimulatedInverter {
            device,
            model: InverterModel::new(),
            setpoint_w: 3000,
            period: INVERTER_PROFILE_PERIOD,
            started_at: None,
        }));
    }
    for c in &config.charge_point {
        let mut device = ChargePoint::new(c.clone())?;
        device.set_start_stop(StartStop::Start);
        devices.push(Box::new(SimulatedChargePoint {
            device,
            current_ma: c.max_current_ma,
            model: ChargePointModel::new(),
            period: PHASE_PROFILE_PERIOD,
            started_at: None,
        }));
    }
    for c in &config.test_rig {
        let mut device = TestRig::new(c.clone())?;
        device.set_start_stop(StartStop::Start);
        devices.push(Box::new(SimulatedTestRig {
            device,
            model: TestRigModel::new(50.0),
        }));
    }

    debug!(count = devices.len(), "simulated devices built");
    Ok(devices)
}
