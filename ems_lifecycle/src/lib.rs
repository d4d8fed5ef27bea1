//! # EMS Lifecycle
//!
//! Device lifecycle engine for an energy-management agent. Every managed
//! device (battery, inverter, charge point, test rig) is driven by a small
//! deterministic state machine that is run once per control cycle.
//!
//! ## Layers
//!
//! 1. **engine**: generic state machine: one handler per state, entry and
//!    exit hooks on change, fail-safe reset to the initial state
//! 2. **context**: per-cycle snapshot, clock and command sinks
//! 3. **lifecycle**: the canonical UNDEFINED / GO_RUNNING / RUNNING /
//!    GO_STOPPED / STOPPED / ERROR pattern and its timing helpers
//! 4. **component**: what a device embeds to own one lifecycle
//! 5. **device**: the four device families
//! 6. **sim** / **cycle**: simulated equipment and the fixed-cycle runner
//!
//! Everything runs on one thread. No handler blocks; waiting is expressed
//! as staying in a state across cycles.

pub mod component;
pub mod context;
pub mod cycle;
pub mod device;
pub mod engine;
pub mod lifecycle;
pub mod sim;
