//! EMS Common Library
//!
//! Shared types, constants and configuration loading for the EMS agent
//! workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide constants and default timings
//! - [`config`] - Configuration loading traits and types
//! - [`lifecycle`] - Lifecycle tags, status flags and device configuration
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use ems_common::prelude::*;
//!
//! assert_eq!(LifecycleState::default(), LifecycleState::Undefined);
//! ```

pub mod config;
pub mod consts;
pub mod lifecycle;
pub mod prelude;
