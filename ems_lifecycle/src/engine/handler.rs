//! State and handler contracts.

use std::fmt::Debug;
use std::hash::Hash;

use super::error::HandlerError;

/// A member of a closed, enumerable set of states.
///
/// `all()` fixes the set the engine requires handlers for.
pub trait State: Copy + Eq + Hash + Debug + 'static {
    /// Every state, in a stable order.
    fn all() -> &'static [Self];

    /// CamelCase name for debug output.
    fn name(self) -> &'static str;
}

/// Behaviour bound to exactly one state.
///
/// A handler lives as long as its machine. Any sub-state it keeps must be
/// reset in [`on_entry`](Self::on_entry); field initialisers run only once.
pub trait StateHandler<S, C: ?Sized> {
    /// Called when the machine enters this handler's state.
    fn on_entry(&mut self, _ctx: &C) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Do one cycle of work and return the desired next state.
    ///
    /// Returning the handler's own state means "stay". Must not block.
    fn run_and_get_next_state(&mut self, ctx: &C) -> Result<S, HandlerError>;

    /// Called when the machine leaves this handler's state.
    fn on_exit(&mut self, _ctx: &C) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Name of the current sub-state, if the handler sequences one.
    fn sub_state(&self) -> Option<&'static str> {
        None
    }
}
