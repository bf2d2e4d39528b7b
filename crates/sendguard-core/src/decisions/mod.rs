//! Audit trail of every action the engine takes.

mod log;
mod model;

pub use log::{DECISION_CAPACITY, DecisionFilter, DecisionLog};
pub use model::{ActionTaken, Decision, DecisionOutcome};
