//! Interface to the automations that execute tasks
//!
//! An automation reads a claimed task, does its work (LLM extraction,
//! reconciliation matching) and returns a proposed decision with signals.
//! It classifies its own failures so the queue knows whether to retry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::decision::AutomationOutput;
use crate::state::Task;

/// Why an automation run failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    /// Worth retrying: timeouts, rate limits, unavailable upstream
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help: unreadable input, rejected request
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl AutomationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AutomationError::Transient(_))
    }
}

/// Shared reference to an automation
pub type SharedAutomation = Arc<dyn AutomationService>;

/// An automation capable of executing tasks
#[async_trait]
pub trait AutomationService: Send + Sync {
    /// Name recorded as the actor in audit entries
    fn name(&self) -> &str;

    /// Execute a claimed task
    async fn run(&self, task: &Task) -> Result<AutomationOutput, AutomationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_retries() {
        assert!(AutomationError::Transient("429".into()).is_retryable());
        assert!(!AutomationError::Permanent("400".into()).is_retryable());
    }
}
