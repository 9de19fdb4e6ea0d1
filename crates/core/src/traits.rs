//! State machine traits.

use crate::{Action, Event};
use std::time::Duration;

/// A complete, runnable state machine (a whole replica).
///
/// The runner sets the current time before delivering each event, then
/// executes every returned action.
pub trait StateMachine {
    /// Process one event, returning the actions it provokes.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Update the state machine's notion of "now".
    fn set_time(&mut self, now: Duration);
}

/// A component state machine composed into a larger one.
///
/// Same contract as [`StateMachine`]; the distinction exists so that a
/// composite can route events to its parts without itself being routable.
pub trait SubStateMachine {
    /// Process one event, returning the actions it provokes.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Update the component's notion of "now".
    fn set_time(&mut self, now: Duration);
}
