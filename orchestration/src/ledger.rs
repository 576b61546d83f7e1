//! Interface to the ledger posting routine
//!
//! Implementations must be idempotent per (tenant, source_ref): committing a
//! decision that is already posted returns the existing reference.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decision::ProposedDecision;

/// Proof that a decision was posted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Ledger-side reference of the posting
    pub posted_reference: String,
}

impl CommitReceipt {
    pub fn new(posted_reference: impl Into<String>) -> Self {
        Self {
            posted_reference: posted_reference.into(),
        }
    }
}

/// Why a commit failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    /// The ledger refused the booking (closed period, unknown account, ...)
    #[error("Ledger rejected the booking: {0}")]
    Rejected(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger commit timed out after {0} ms")]
    Timeout(u64),
}

/// Shared reference to a ledger committer
pub type SharedLedger = Arc<dyn LedgerCommitter>;

/// Posts approved decisions to the ledger
#[async_trait]
pub trait LedgerCommitter: Send + Sync {
    async fn commit(&self, decision: &ProposedDecision) -> Result<CommitReceipt, CommitError>;
}

/// Commit with an upper bound on how long the ledger may take
pub async fn commit_within(
    ledger: &dyn LedgerCommitter,
    decision: &ProposedDecision,
    limit: Duration,
) -> Result<CommitReceipt, CommitError> {
    match tokio::time::timeout(limit, ledger.commit(decision)).await {
        Ok(result) => result,
        Err(_) => Err(CommitError::Timeout(limit.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionKind;

    struct SlowLedger;

    #[async_trait]
    impl LedgerCommitter for SlowLedger {
        async fn commit(&self, _decision: &ProposedDecision) -> Result<CommitReceipt, CommitError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CommitReceipt::new("late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_within_times_out() {
        let decision = ProposedDecision::new("acme", "inv-1", DecisionKind::VendorInvoice, 10.0);
        let result = commit_within(&SlowLedger, &decision, Duration::from_secs(5)).await;
        assert_eq!(result, Err(CommitError::Timeout(5_000)));
    }
}
