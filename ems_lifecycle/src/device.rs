//! Device families built on the canonical lifecycle.
//!
//! Each family owns a [`Lifecycle`](crate::component::Lifecycle), builds a
//! per-cycle context from the latest equipment readings, runs the machine
//! and hands back the commands to write. Equipment I/O stays outside.

use ems_common::config::ConfigError;
use ems_common::lifecycle::state::LifecycleState;
use thiserror::Error;

use crate::engine::BuildError;

pub mod battery;
pub mod battery_inverter;
pub mod charge_point;
pub mod test_rig;

pub use battery::{Battery, BatteryCommands, BatteryReadings};
pub use battery_inverter::{BatteryInverter, InverterCommands, InverterReadings, InverterState};
pub use charge_point::{
    ChargeMode, ChargePoint, ChargePointCommands, ChargePointReadings, ChargeRequest,
};
pub use test_rig::{TestRig, TestRigCommands, TestRigReadings};

/// A device could not be constructed.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The device configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The lifecycle handler table could not be built.
    #[error(transparent)]
    Build(#[from] BuildError<LifecycleState>),
}
