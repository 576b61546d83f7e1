//! HTTP ledger committer
//!
//! Posts each decision with an `Idempotency-Key` derived from its tenant and
//! source reference, so a retried commit of the same document never books it
//! twice. The ledger answers 409 Conflict for a key it has already posted;
//! that counts as success.

use async_trait::async_trait;
use orchestration::{CommitError, CommitReceipt, LedgerCommitter, ProposedDecision};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LedgerEndpoint;
use crate::AgentsError;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
struct PostEntry<'a> {
    tenant_id: &'a str,
    source_ref: &'a str,
    decision: &'a ProposedDecision,
}

#[derive(Deserialize)]
struct PostedEntry {
    posted_reference: Option<String>,
}

/// Idempotency key for a decision: blake3 of tenant and source reference
pub fn idempotency_key(decision: &ProposedDecision) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(decision.tenant_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(decision.source_ref.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// [`LedgerCommitter`] over the ledger's HTTP API
pub struct HttpLedgerCommitter {
    http: reqwest::Client,
    endpoint: LedgerEndpoint,
}

impl HttpLedgerCommitter {
    pub fn new(endpoint: LedgerEndpoint) -> Result<Self, AgentsError> {
        let http = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| AgentsError::Http(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    fn request_error(&self, e: reqwest::Error) -> CommitError {
        if e.is_timeout() {
            CommitError::Timeout(self.endpoint.timeout.as_millis() as u64)
        } else {
            CommitError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl LedgerCommitter for HttpLedgerCommitter {
    async fn commit(&self, decision: &ProposedDecision) -> Result<CommitReceipt, CommitError> {
        let key = idempotency_key(decision);
        let body = PostEntry {
            tenant_id: &decision.tenant_id,
            source_ref: &decision.source_ref,
            decision,
        };

        let mut builder = self
            .http
            .post(self.endpoint.entries_url())
            .header(IDEMPOTENCY_HEADER, &key)
            .json(&body);
        if let Some(api_key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();

        if status.is_success() || status == StatusCode::CONFLICT {
            let posted: PostedEntry = response
                .json()
                .await
                .unwrap_or(PostedEntry {
                    posted_reference: None,
                });
            let Some(reference) = posted.posted_reference else {
                if status == StatusCode::CONFLICT {
                    // Already posted but the ledger did not echo the reference
                    debug!(source_ref = %decision.source_ref, "Conflict without reference");
                    return Ok(CommitReceipt::new(format!("idem:{}", key)));
                }
                return Err(CommitError::Unavailable(
                    "Ledger accepted the entry without a posted_reference".to_string(),
                ));
            };
            info!(
                tenant_id = %decision.tenant_id,
                source_ref = %decision.source_ref,
                posted_reference = %reference,
                replayed = status == StatusCode::CONFLICT,
                "Ledger entry posted"
            );
            return Ok(CommitReceipt::new(reference));
        }

        let text = response.text().await.unwrap_or_default();
        warn!(source_ref = %decision.source_ref, %status, "Ledger refused entry");
        Err(classify_status(status, &text))
    }
}

/// Map a non-success, non-conflict status to a commit error
pub fn classify_status(status: StatusCode, body: &str) -> CommitError {
    let message = format!("HTTP {}: {}", status, body);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        CommitError::Unavailable(message)
    } else {
        CommitError::Rejected(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestration::DecisionKind;

    #[test]
    fn test_idempotency_key_is_per_document() {
        let a = ProposedDecision::new("acme", "inv-1", DecisionKind::VendorInvoice, 10.0);
        let same = ProposedDecision::new("acme", "inv-1", DecisionKind::VendorInvoice, 99.0);
        let other_tenant = ProposedDecision::new("globex", "inv-1", DecisionKind::VendorInvoice, 10.0);
        // No concatenation ambiguity between tenant and source
        let shifted = ProposedDecision::new("acmei", "nv-1", DecisionKind::VendorInvoice, 10.0);

        assert_eq!(idempotency_key(&a), idempotency_key(&same));
        assert_ne!(idempotency_key(&a), idempotency_key(&other_tenant));
        assert_ne!(idempotency_key(&a), idempotency_key(&shifted));
        assert_eq!(idempotency_key(&a).len(), 64);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "period closed"),
            CommitError::Rejected(m) if m.contains("period closed")
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            CommitError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            CommitError::Unavailable(_)
        ));
    }
}
