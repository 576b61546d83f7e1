use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::AgentsError;

/// OpenAI-compatible chat completions endpoint used by the booking agent.
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    /// Base URL up to and including `/v1`
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request HTTP timeout
    pub timeout: Duration,
}

impl LlmEndpoint {
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url.trim_end_matches('/'))
    }
}

/// Ledger posting API.
#[derive(Debug, Clone)]
pub struct LedgerEndpoint {
    /// Base URL; entries are posted to `{url}/entries`
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl LedgerEndpoint {
    pub fn entries_url(&self) -> String {
        format!("{}/entries", self.url.trim_end_matches('/'))
    }
}

/// Top-level agents configuration.
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    pub llm: LlmEndpoint,
    pub ledger: LedgerEndpoint,
    /// RocksDB directory (requires the `heavy-state` feature)
    pub state_path: Option<PathBuf>,
    /// Orchestration TOML file
    pub orchestration_config: Option<PathBuf>,
    /// Workers spawned per agent kind by `run`
    pub workers_per_agent: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AgentsConfig {
    /// Build the configuration from a variable lookup, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                lookup(key)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        };

        Self {
            llm: LlmEndpoint {
                url: lookup("BACKOFFICE_LLM_URL")
                    .unwrap_or_else(|| "http://localhost:8000/v1".into()),
                model: lookup("BACKOFFICE_LLM_MODEL").unwrap_or_else(|| "booking-assistant".into()),
                api_key: lookup("BACKOFFICE_LLM_API_KEY"),
                temperature: lookup("BACKOFFICE_LLM_TEMPERATURE")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.1),
                max_tokens: lookup("BACKOFFICE_LLM_MAX_TOKENS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2048),
                timeout: secs("BACKOFFICE_LLM_TIMEOUT_SECS", 90),
            },
            ledger: LedgerEndpoint {
                url: lookup("BACKOFFICE_LEDGER_URL")
                    .unwrap_or_else(|| "http://localhost:9000/api".into()),
                api_key: lookup("BACKOFFICE_LEDGER_API_KEY"),
                timeout: secs("BACKOFFICE_LEDGER_TIMEOUT_SECS", 20),
            },
            state_path: lookup("BACKOFFICE_STATE_PATH").map(PathBuf::from),
            orchestration_config: lookup("BACKOFFICE_CONFIG").map(PathBuf::from),
            workers_per_agent: lookup("BACKOFFICE_WORKERS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(2),
        }
    }
}

impl AgentsConfig {
    /// State directory for commands that act on the runtime's shared state
    ///
    /// An in-memory store would start empty and vanish on exit, so those
    /// commands refuse to run without one.
    pub fn require_state_path(&self) -> Result<&Path, AgentsError> {
        self.state_path.as_deref().ok_or(AgentsError::NoStatePath)
    }
}

/// Check if an inference endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
