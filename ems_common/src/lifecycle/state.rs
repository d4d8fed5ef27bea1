//! Lifecycle tags shared by every device family.
//!
//! `LifecycleState` is the canonical bring-up/bring-down shape. The numeric
//! values are the ones published on the status channel, so they are stable.

use serde::{Deserialize, Serialize};

// ─── Lifecycle State ────────────────────────────────────────────────

/// Canonical device lifecycle state.
///
/// `Undefined` is the initial state and the fail-safe reset target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(i8)]
pub enum LifecycleState {
    /// Direction not yet decided.
    #[default]
    Undefined = -1,
    /// Bring-up sequence in progress.
    GoRunning = 10,
    /// Equipment confirmed running, setpoints applied.
    Running = 11,
    /// Stop command issued, waiting for confirmation.
    GoStopped = 20,
    /// Equipment confirmed stopped.
    Stopped = 21,
    /// Fault cool-down before retrying.
    Error = 30,
}

impl LifecycleState {
    /// Every state, in publication order.
    pub const ALL: [Self; 6] = [
        Self::Undefined,
        Self::GoRunning,
        Self::Running,
        Self::GoStopped,
        Self::Stopped,
        Self::Error,
    ];

    /// Convert from the published raw value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_i8(value: i8) -> Option<Self> {
        match value {
            -1 => Some(Self::Undefined),
            10 => Some(Self::GoRunning),
            11 => Some(Self::Running),
            20 => Some(Self::GoStopped),
            21 => Some(Self::Stopped),
            30 => Some(Self::Error),
            _ => None,
        }
    }

    /// CamelCase name used in debug logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::GoRunning => "GoRunning",
            Self::Running => "Running",
            Self::GoStopped => "GoStopped",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

// ─── Start/Stop ─────────────────────────────────────────────────────

/// Tri-state commanded direction, also used as the published coarse status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartStop {
    /// No direction requested / not known.
    #[default]
    Undefined,
    /// Bring the equipment up.
    Start,
    /// Bring the equipment down.
    Stop,
}

/// Configured start/stop policy of a device.
///
/// `Auto` follows the supervisory target; `Start`/`Stop` pin it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartStopConfig {
    /// Follow the externally requested target.
    #[default]
    Auto,
    /// Always start.
    Start,
    /// Always stop.
    Stop,
}

impl StartStopConfig {
    /// Resolve the effective target given the externally requested one.
    #[inline]
    pub const fn resolve(self, requested: StartStop) -> StartStop {
        match self {
            Self::Auto => requested,
            Self::Start => StartStop::Start,
            Self::Stop => StartStop::Stop,
        }
    }
}

// ─── Device Modes ───────────────────────────────────────────────────

/// Grid connection mode of a battery inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    /// Grid-following operation.
    #[default]
    OnGrid,
    /// Island (grid-forming) operation.
    OffGrid,
}

/// Number of phases a charge point charges with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phases {
    /// Single-phase charging.
    Single,
    /// Three-phase charging.
    #[default]
    Three,
}
