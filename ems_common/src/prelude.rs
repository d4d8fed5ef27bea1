//! Prelude module for common re-exports.
//!
//! ```rust
//! use ems_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};
pub use crate::lifecycle::config::{
    AgentConfig, BatteryConfig, BatteryInverterConfig, ChargePointConfig, TestRigConfig,
};

// ─── Lifecycle Types ────────────────────────────────────────────────
pub use crate::lifecycle::flags::StatusFlags;
pub use crate::lifecycle::state::{GridMode, LifecycleState, Phases, StartStop, StartStopConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{CYCLE_TIME_MS, ERROR_COOL_DOWN_S};

/// Default control cycle as Duration.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(CYCLE_TIME_MS);
