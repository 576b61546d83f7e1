//! Review priority rules
//!
//! Lower confidence means higher priority. Business magnitude can only raise
//! priority: a large amount is never reviewed at low priority, and a very
//! large amount is always urgent.

use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::state::ReviewPriority;

/// Confidence below which an item is high priority
pub const HIGH_PRIORITY_BELOW: f64 = 0.4;

/// Confidence below which an item is medium priority
pub const MEDIUM_PRIORITY_BELOW: f64 = 0.6;

/// Thresholds for deriving review priority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityRules {
    pub high_below: f64,
    pub medium_below: f64,
    pub large_amount: f64,
    pub urgent_amount: f64,
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self::from_policy(&PolicyConfig::default())
    }
}

impl PriorityRules {
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self {
            high_below: HIGH_PRIORITY_BELOW,
            medium_below: MEDIUM_PRIORITY_BELOW,
            large_amount: policy.large_amount_threshold,
            urgent_amount: policy.urgent_amount_threshold,
        }
    }

    /// Priority for a decision with the given confidence and amount
    pub fn priority(&self, confidence: f64, magnitude: f64) -> ReviewPriority {
        let by_confidence = if confidence < self.high_below {
            ReviewPriority::High
        } else if confidence < self.medium_below {
            ReviewPriority::Medium
        } else {
            ReviewPriority::Low
        };

        if magnitude >= self.urgent_amount {
            ReviewPriority::Urgent
        } else if magnitude >= self.large_amount {
            by_confidence.max(ReviewPriority::Medium)
        } else {
            by_confidence
        }
    }

    /// Priority for a decision that scored high but failed to commit
    pub fn commit_failure_priority(&self, confidence: f64, magnitude: f64) -> ReviewPriority {
        self.priority(confidence, magnitude).max(ReviewPriority::High)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bands() {
        let rules = PriorityRules::default();
        assert_eq!(rules.priority(0.2, 10.0), ReviewPriority::High);
        assert_eq!(rules.priority(0.5, 10.0), ReviewPriority::Medium);
        assert_eq!(rules.priority(0.8, 10.0), ReviewPriority::Low);
    }

    #[test]
    fn test_large_amount_forces_medium() {
        let rules = PriorityRules::default();
        assert_eq!(rules.priority(0.84, 5_000.0), ReviewPriority::Medium);
        // Never lowers an already higher priority
        assert_eq!(rules.priority(0.1, 5_000.0), ReviewPriority::High);
    }

    #[test]
    fn test_urgent_amount() {
        let rules = PriorityRules::default();
        assert_eq!(rules.priority(0.84, 50_000.0), ReviewPriority::Urgent);
    }

    #[test]
    fn test_commit_failure_is_at_least_high() {
        let rules = PriorityRules::default();
        assert_eq!(rules.commit_failure_priority(0.95, 10.0), ReviewPriority::High);
        assert_eq!(
            rules.commit_failure_priority(0.95, 80_000.0),
            ReviewPriority::Urgent
        );
    }
}
