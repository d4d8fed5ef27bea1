//! System-wide constants for the EMS workspace.
//!
//! Single source of truth for cycle timing and lifecycle defaults.
//! All durations are in seconds unless the name says otherwise.

use static_assertions::const_assert;

/// Default control cycle time in milliseconds.
pub const CYCLE_TIME_MS: u64 = 1000;
/// Minimum accepted control cycle time [ms].
pub const CYCLE_TIME_MS_MIN: u64 = 10;
/// Maximum accepted control cycle time [ms].
pub const CYCLE_TIME_MS_MAX: u64 = 60_000;

/// Cool-down spent in ERROR before the lifecycle retries.
pub const ERROR_COOL_DOWN_S: u64 = 120;
/// Lower bound for any configured cool-down.
pub const ERROR_COOL_DOWN_S_MIN: u64 = 1;
/// Upper bound for any configured cool-down.
pub const ERROR_COOL_DOWN_S_MAX: u64 = 3600;

/// Maximum time a battery may spend in its bring-up sequence.
pub const BATTERY_MAX_START_TIME_S: u64 = 120;

/// Per-step timeout for the battery-inverter bring-up sequence.
pub const INVERTER_STEP_TIMEOUT_S: u64 = 30;
/// Zero-setpoint time after which the inverter is sent to sleep.
pub const INVERTER_POWER_SAVING_DELAY_S: u64 = 60;

/// Timeout for the charge-point bring-up (enable → ready).
pub const CHARGE_POINT_START_TIMEOUT_S: u64 = 60;
/// Dead-time after a disruptive phase-switch command.
pub const PHASE_SWITCH_DEAD_TIME_S: u64 = 30;
/// Time a phase-switch predicate must hold continuously.
pub const PHASE_SWITCH_SETTLE_S: u64 = 1;
/// Give-up timeout of a single phase-switch step.
pub const PHASE_SWITCH_TIMEOUT_S: u64 = 600;

/// Settle window for the test-rig precharge voltage check.
pub const PRECHARGE_SETTLE_S: u64 = 2;
/// Timeout of a single test-rig bring-up step.
pub const TEST_RIG_STEP_TIMEOUT_S: u64 = 20;

/// Upper bound for any configured step timeout.
pub const STEP_TIMEOUT_S_MAX: u64 = 3600;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ems/agent.toml";

const_assert!(CYCLE_TIME_MS_MIN <= CYCLE_TIME_MS && CYCLE_TIME_MS <= CYCLE_TIME_MS_MAX);
const_assert!(ERROR_COOL_DOWN_S_MIN <= ERROR_COOL_DOWN_S);
const_assert!(PHASE_SWITCH_DEAD_TIME_S + PHASE_SWITCH_SETTLE_S < PHASE_SWITCH_TIMEOUT_S);
