//! Agent and device configuration.
//!
//! All config types use `serde::Deserialize` for TOML loading. Timing fields
//! are whole seconds, default from [`crate::consts`] and are bounds-checked
//! by `validate()`.
//!
//! ```toml
//! cycle_time_ms = 1000
//!
//! [shared]
//! service_name = "ems-agent-01"
//!
//! [[battery]]
//! id = "battery0"
//! start_stop = "start"
//! start_up_relay = "io0/Relay4"
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    BATTERY_MAX_START_TIME_S, CHARGE_POINT_START_TIMEOUT_S, CYCLE_TIME_MS, CYCLE_TIME_MS_MAX,
    CYCLE_TIME_MS_MIN, ERROR_COOL_DOWN_S, ERROR_COOL_DOWN_S_MAX, ERROR_COOL_DOWN_S_MIN,
    INVERTER_POWER_SAVING_DELAY_S, INVERTER_STEP_TIMEOUT_S, PHASE_SWITCH_DEAD_TIME_S,
    PHASE_SWITCH_SETTLE_S, PHASE_SWITCH_TIMEOUT_S, PRECHARGE_SETTLE_S, STEP_TIMEOUT_S_MAX,
    TEST_RIG_STEP_TIMEOUT_S,
};
use crate::lifecycle::state::{GridMode, StartStopConfig};

// ─── Top-Level Config ───────────────────────────────────────────────

/// Complete agent configuration: shared settings plus every device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Common service settings.
    pub shared: SharedConfig,

    /// Control cycle period [ms] (default: 1000).
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// Relay-started batteries.
    #[serde(default)]
    pub battery: Vec<BatteryConfig>,

    /// Battery inverters.
    #[serde(default)]
    pub battery_inverter: Vec<BatteryInverterConfig>,

    /// EV charge points.
    #[serde(default)]
    pub charge_point: Vec<ChargePointConfig>,

    /// Cyclic test rigs.
    #[serde(default)]
    pub test_rig: Vec<TestRigConfig>,
}

impl AgentConfig {
    /// Control cycle period.
    #[inline]
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Total number of configured devices.
    pub fn device_count(&self) -> usize {
        self.battery.len()
            + self.battery_inverter.len()
            + self.charge_point.len()
            + self.test_rig.len()
    }

    /// Validate the whole agent configuration.
    ///
    /// Checks shared settings, cycle bounds, every device and that device
    /// ids are unique across all families.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        check_range("cycle_time_ms", self.cycle_time_ms, CYCLE_TIME_MS_MIN, CYCLE_TIME_MS_MAX)?;

        for c in &self.battery {
            c.validate()?;
        }
        for c in &self.battery_inverter {
            c.validate()?;
        }
        for c in &self.charge_point {
            c.validate()?;
        }
        for c in &self.test_rig {
            c.validate()?;
        }

        let mut seen = HashSet::new();
        let ids = self
            .battery
            .iter()
            .map(|c| &c.id)
            .chain(self.battery_inverter.iter().map(|c| &c.id))
            .chain(self.charge_point.iter().map(|c| &c.id))
            .chain(self.test_rig.iter().map(|c| &c.id));
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device id '{id}'"
                )));
            }
        }
        Ok(())
    }
}

// ─── Battery ────────────────────────────────────────────────────────

/// Battery with an optional start-up relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Component identifier.
    pub id: String,
    /// Start/stop policy.
    #[serde(default)]
    pub start_stop: StartStopConfig,
    /// Address of the start-up relay output, if the battery has one.
    #[serde(default)]
    pub start_up_relay: Option<String>,
    /// Cool-down in ERROR [s].
    #[serde(default = "default_error_cool_down_s")]
    pub error_cool_down_s: u64,
    /// Bring-up time budget [s].
    #[serde(default = "default_battery_max_start_time_s")]
    pub max_start_time_s: u64,
}

impl BatteryConfig {
    pub fn error_cool_down(&self) -> Duration {
        Duration::from_secs(self.error_cool_down_s)
    }

    pub fn max_start_time(&self) -> Duration {
        Duration::from_secs(self.max_start_time_s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_id(&self.id)?;
        check_cool_down(&self.id, self.error_cool_down_s)?;
        check_timeout(&self.id, "max_start_time_s", self.max_start_time_s)?;
        if matches!(&self.start_up_relay, Some(addr) if addr.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "{}: start_up_relay must not be blank",
                self.id
            )));
        }
        Ok(())
    }
}

// ─── Battery Inverter ───────────────────────────────────────────────

/// Battery inverter with wake/sleep signalling and grid-mode switching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryInverterConfig {
    /// Component identifier.
    pub id: String,
    /// Start/stop policy.
    #[serde(default)]
    pub start_stop: StartStopConfig,
    /// Grid mode selected at start-up.
    #[serde(default)]
    pub grid_mode: GridMode,
    /// Timeout of each bring-up step [s].
    #[serde(default = "default_inverter_step_timeout_s")]
    pub step_timeout_s: u64,
    /// Zero-setpoint time before sleeping [s]; 0 disables power saving.
    #[serde(default = "default_power_saving_delay_s")]
    pub power_saving_delay_s: u64,
    /// Cool-down in ERROR [s].
    #[serde(default = "default_error_cool_down_s")]
    pub error_cool_down_s: u64,
}

impl BatteryInverterConfig {
    pub fn error_cool_down(&self) -> Duration {
        Duration::from_secs(self.error_cool_down_s)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_s)
    }

    /// `None` when power saving is disabled.
    pub fn power_saving_delay(&self) -> Option<Duration> {
        (self.power_saving_delay_s > 0).then(|| Duration::from_secs(self.power_saving_delay_s))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_id(&self.id)?;
        check_cool_down(&self.id, self.error_cool_down_s)?;
        check_timeout(&self.id, "step_timeout_s", self.step_timeout_s)?;
        check_range(
            "power_saving_delay_s",
            self.power_saving_delay_s,
            0,
            STEP_TIMEOUT_S_MAX,
        )
    }
}

// ─── Charge Point ───────────────────────────────────────────────────

/// EV charge point, optionally with a phase-switching contactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointConfig {
    /// Component identifier.
    pub id: String,
    /// Start/stop policy.
    #[serde(default)]
    pub start_stop: StartStopConfig,
    /// Whether the charge point can switch between 1 and 3 phases.
    #[serde(default)]
    pub phase_switching: bool,
    /// Minimum charge current [mA].
    #[serde(default = "default_min_current_ma")]
    pub min_current_ma: u32,
    /// Maximum charge current [mA].
    #[serde(default = "default_max_current_ma")]
    pub max_current_ma: u32,
    /// Enable → ready timeout [s].
    #[serde(default = "default_charge_point_start_timeout_s")]
    pub start_timeout_s: u64,
    /// Dead-time after each phase-switch command [s].
    #[serde(default = "default_phase_switch_dead_time_s")]
    pub phase_switch_dead_time_s: u64,
    /// Settle window of each phase-switch predicate [s].
    #[serde(default = "default_phase_switch_settle_s")]
    pub phase_switch_settle_s: u64,
    /// Give-up timeout of each phase-switch step [s].
    #[serde(default = "default_phase_switch_timeout_s")]
    pub phase_switch_timeout_s: u64,
    /// Cool-down in ERROR [s].
    #[serde(default = "default_error_cool_down_s")]
    pub error_cool_down_s: u64,
}

impl ChargePointConfig {
    pub fn error_cool_down(&self) -> Duration {
        Duration::from_secs(self.error_cool_down_s)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_s)
    }

    pub fn phase_switch_dead_time(&self) -> Duration {
        Duration::from_secs(self.phase_switch_dead_time_s)
    }

    pub fn phase_switch_settle(&self) -> Duration {
        Duration::from_secs(self.phase_switch_settle_s)
    }

    pub fn phase_switch_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_switch_timeout_s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_id(&self.id)?;
        check_cool_down(&self.id, self.error_cool_down_s)?;
        check_timeout(&self.id, "start_timeout_s", self.start_timeout_s)?;
        check_timeout(&self.id, "phase_switch_timeout_s", self.phase_switch_timeout_s)?;
        if self.min_current_ma == 0 || self.min_current_ma > self.max_current_ma {
            return Err(ConfigError::ValidationError(format!(
                "{}: invalid current range {}..{} mA",
                self.id, self.min_current_ma, self.max_current_ma
            )));
        }
        if self.phase_switch_dead_time_s + self.phase_switch_settle_s >= self.phase_switch_timeout_s {
            return Err(ConfigError::ValidationError(format!(
                "{}: phase-switch dead-time + settle must be shorter than its timeout",
                self.id
            )));
        }
        Ok(())
    }
}

// ─── Test Rig ───────────────────────────────────────────────────────

/// Cyclic charge/discharge test rig behind a precharged DC link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRigConfig {
    /// Component identifier.
    pub id: String,
    /// Start/stop policy.
    #[serde(default)]
    pub start_stop: StartStopConfig,
    /// Cycling power magnitude [W].
    #[serde(default = "default_rig_power_w")]
    pub power_w: i32,
    /// Lower SoC bound where charging begins [%].
    #[serde(default = "default_rig_soc_min")]
    pub soc_min: u8,
    /// Upper SoC bound where discharging begins [%].
    #[serde(default = "default_rig_soc_max")]
    pub soc_max: u8,
    /// Lower limit of the precharged DC-link voltage [V].
    #[serde(default = "default_rig_precharge_min_v")]
    pub precharge_min_v: f32,
    /// Upper limit of the precharged DC-link voltage [V].
    #[serde(default = "default_rig_precharge_max_v")]
    pub precharge_max_v: f32,
    /// Settle window of the precharge voltage check [s].
    #[serde(default = "default_rig_precharge_settle_s")]
    pub precharge_settle_s: u64,
    /// Timeout of each bring-up step [s].
    #[serde(default = "default_rig_step_timeout_s")]
    pub step_timeout_s: u64,
    /// Cool-down in ERROR [s].
    #[serde(default = "default_error_cool_down_s")]
    pub error_cool_down_s: u64,
}

impl TestRigConfig {
    pub fn error_cool_down(&self) -> Duration {
        Duration::from_secs(self.error_cool_down_s)
    }

    pub fn precharge_settle(&self) -> Duration {
        Duration::from_secs(self.precharge_settle_s)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_id(&self.id)?;
        check_cool_down(&self.id, self.error_cool_down_s)?;
        check_timeout(&self.id, "step_timeout_s", self.step_timeout_s)?;
        if self.power_w <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "{}: power_w must be positive",
                self.id
            )));
        }
        if self.soc_min >= self.soc_max || self.soc_max > 100 {
            return Err(ConfigError::ValidationError(format!(
                "{}: invalid SoC window {}..{}",
                self.id, self.soc_min, self.soc_max
            )));
        }
        if !(self.precharge_min_v > 0.0 && self.precharge_min_v < self.precharge_max_v) {
            return Err(ConfigError::ValidationError(format!(
                "{}: invalid precharge band {}..{} V",
                self.id, self.precharge_min_v, self.precharge_max_v
            )));
        }
        if self.precharge_settle_s >= self.step_timeout_s {
            return Err(ConfigError::ValidationError(format!(
                "{}: precharge_settle_s must be shorter than step_timeout_s",
                self.id
            )));
        }
        Ok(())
    }
}

// ─── Validation Helpers ─────────────────────────────────────────────

fn check_id(id: &str) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "device id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::ValidationError(format!(
            "{name} = {value} out of range [{min}, {max}]"
        )));
    }
    Ok(())
}

fn check_cool_down(id: &str, value: u64) -> Result<(), ConfigError> {
    check_range(
        &format!("{id}.error_cool_down_s"),
        value,
        ERROR_COOL_DOWN_S_MIN,
        ERROR_COOL_DOWN_S_MAX,
    )
}

fn check_timeout(id: &str, name: &str, value: u64) -> Result<(), ConfigError> {
    check_range(&format!("{id}.{name}"), value, 1, STEP_TIMEOUT_S_MAX)
}

// ─── Serde Defaults ─────────────────────────────────────────────────

fn default_cycle_time_ms() -> u64 {
    CYCLE_TIME_MS
}
fn default_error_cool_down_s() -> u64 {
    ERROR_COOL_DOWN_S
}
fn default_battery_max_start_time_s() -> u64 {
    BATTERY_MAX_START_TIME_S
}
fn default_inverter_step_timeout_s() -> u64 {
    INVERTER_STEP_TIMEOUT_S
}
fn default_power_saving_delay_s() -> u64 {
    INVERTER_POWER_SAVING_DELAY_S
}
fn default_min_current_ma() -> u32 {
    6000
}
fn default_max_current_ma() -> u32 {
    32000
}
fn default_charge_point_start_timeout_s() -> u64 {
    CHARGE_POINT_START_TIMEOUT_S
}
fn default_phase_switch_dead_time_s() -> u64 {
    PHASE_SWITCH_DEAD_TIME_S
}
fn default_phase_switch_settle_s() -> u64 {
    PHASE_SWITCH_SETTLE_S
}
fn default_phase_switch_timeout_s() -> u64 {
    PHASE_SWITCH_TIMEOUT_S
}
fn default_rig_power_w() -> i32 {
    5000
}
fn default_rig_soc_min() -> u8 {
    10
}
fn default_rig_soc_max() -> u8 {
    90
}
fn default_rig_precharge_min_v() -> f32 {
    600.0
}
fn default_rig_precharge_max_v() -> f32 {
    800.0
}
fn default_rig_precharge_settle_s() -> u64 {
    PRECHARGE_SETTLE_S
}
fn default_rig_step_timeout_s() -> u64 {
    TEST_RIG_STEP_TIMEOUT_S
}

// ─── Tests ──────────────────────────────────────────────────────────
