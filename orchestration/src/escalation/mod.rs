//! Human review escalation
//!
//! Low confidence is not an error. It is the path by which the pipeline
//! degrades gracefully: the decision becomes a review item carrying the
//! weakest factor as its reason, prioritised by confidence and amount.

pub mod escalator;
pub mod priority;

pub use escalator::{
    EscalationError, EscalationResult, ResolveOutcome, Resolution, ReviewEscalator, ReviewFilter,
    SharedEscalator,
};
pub use priority::PriorityRules;
