//! Integration tests for the EMS lifecycle engine.
//!
//! These tests drive complete device families against simulated equipment
//! and a controllable clock, covering bring-up, recovery, supervision and
//! the agent's configuration-to-runner path.

mod integration;
