//! Lifecycle module root.
//!
//! Types shared between the lifecycle engine and anything that consumes its
//! published status.

pub mod config;
pub mod flags;
pub mod state;
