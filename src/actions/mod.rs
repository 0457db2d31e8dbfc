//! Per-account channel actions.
//!
//! An action runs inside its own provider session: connect, resolve the
//! channel, invoke, classify the outcome, disconnect.

mod handler;
mod types;

pub use handler::ActionExecutor;
pub use types::{AccountAction, ActionError, ActionOutcome};
