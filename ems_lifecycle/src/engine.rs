//! Generic cycle-driven finite-state-machine engine.
//!
//! One [`StateMachine`] per component. Each cycle the owner calls
//! [`StateMachine::run`] exactly once with a fresh context; the engine asks
//! the current [`StateHandler`] for the next state and fires exit/entry
//! hooks only when the state actually changes.
//!
//! The engine is generic over the state enumeration `S` and the context
//! type `C`; it knows nothing about lifecycles or equipment.

pub mod error;
pub mod handler;
pub mod machine;

pub use error::{BuildError, FailureSite, HandlerError, RunError, StepFailure};
pub use handler::{State, StateHandler};
pub use machine::{StateMachine, StateMachineBuilder};
