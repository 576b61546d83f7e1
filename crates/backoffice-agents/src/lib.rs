//! HTTP collaborators and runtime wiring for the back-office orchestration core
//!
//! - [`LlmBookingAgent`]: automation that asks a chat completions endpoint
//!   for a booking proposal
//! - [`HttpLedgerCommitter`]: idempotent ledger posting over HTTP
//! - [`AgentsConfig`]: endpoint settings from `BACKOFFICE_*` variables

pub mod config;
pub mod ledger_client;
pub mod llm_agent;

pub use config::{check_endpoint, AgentsConfig, LedgerEndpoint, LlmEndpoint};
pub use ledger_client::{idempotency_key, HttpLedgerCommitter};
pub use llm_agent::LlmBookingAgent;

/// Errors building the HTTP collaborators
#[derive(Debug, thiserror::Error)]
pub enum AgentsError {
    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Schema generation failed: {0}")]
    Schema(String),

    #[error("No state path configured; set --state-path or BACKOFFICE_STATE_PATH")]
    NoStatePath,
}
