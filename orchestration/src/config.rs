//! Orchestration configuration
//!
//! Loaded from an optional TOML file, then overridden by `BACKOFFICE_*`
//! environment variables. Every section has working defaults, so an empty
//! file (or no file) is a valid configuration.
//!
//! ```toml
//! [policy]
//! auto_approve_threshold = 0.85
//! large_amount_threshold = 5000.0
//!
//! [policy.tenant_thresholds]
//! acme = 0.95
//!
//! [queue]
//! default_max_retries = 3
//!
//! [retention]
//! keep_finished_days = 30
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::confidence::{ConfidenceError, ConfidenceScorer, ScorerConfig};
use crate::queue::QueueConfig;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid scoring policy: {0}")]
    Scoring(#[from] ConfidenceError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Routing and escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Confidence at or above which decisions are committed autonomously
    pub auto_approve_threshold: f64,
    /// Per-tenant overrides of the threshold
    pub tenant_thresholds: HashMap<String, f64>,
    /// Absolute currency tolerance for arithmetic checks
    pub arithmetic_tolerance: f64,
    /// Amount at or above which a review is at least medium priority
    pub large_amount_threshold: f64,
    /// Amount at or above which a review is urgent
    pub urgent_amount_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 0.85,
            tenant_thresholds: HashMap::new(),
            arithmetic_tolerance: 0.01,
            large_amount_threshold: 5_000.0,
            urgent_amount_threshold: 50_000.0,
        }
    }
}

impl PolicyConfig {
    /// Threshold that applies to `tenant_id`
    pub fn threshold_for(&self, tenant_id: &str) -> f64 {
        self.tenant_thresholds
            .get(tenant_id)
            .copied()
            .unwrap_or(self.auto_approve_threshold)
    }

    pub fn with_tenant_threshold(mut self, tenant_id: impl Into<String>, threshold: f64) -> Self {
        self.tenant_thresholds.insert(tenant_id.into(), threshold);
        self
    }

    /// Scorer configuration implied by this policy
    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            threshold: self.auto_approve_threshold,
            arithmetic_tolerance: self.arithmetic_tolerance,
            ..ScorerConfig::default()
        }
    }

    /// Build the scorer for this policy
    pub fn scorer(&self) -> ConfigResult<ConfidenceScorer> {
        Ok(ConfidenceScorer::new(self.scorer_config())?)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (tenant, threshold) in &self.tenant_thresholds {
            if !(0.0..=1.0).contains(threshold) {
                return Err(ConfigError::InvalidValue {
                    key: format!("policy.tenant_thresholds.{}", tenant),
                    value: threshold.to_string(),
                });
            }
        }
        if self.large_amount_threshold > self.urgent_amount_threshold {
            return Err(ConfigError::Invalid(format!(
                "large_amount_threshold ({}) exceeds urgent_amount_threshold ({})",
                self.large_amount_threshold, self.urgent_amount_threshold
            )));
        }
        self.scorer().map(|_| ())
    }
}

/// Task queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub default_max_retries: u32,
    /// Base retry delay; unset means retried tasks are claimable immediately
    pub retry_backoff_ms: Option<u64>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retry_backoff_ms: None,
        }
    }
}

impl QueueSettings {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            default_max_retries: self.default_max_retries,
            retry_backoff: self.retry_backoff_ms.map(Duration::from_millis),
        }
    }
}

/// Worker loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Sleep between empty claim attempts
    pub poll_interval_ms: u64,
    /// Upper bound on one automation call
    pub automation_timeout_ms: u64,
    /// Claims older than this are returned to the queue
    pub stale_claim_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            automation_timeout_ms: 120_000,
            stale_claim_secs: 900,
        }
    }
}

/// Event pump settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// Upper bound on one ledger commit
    pub commit_timeout_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval_ms: 1_000,
            commit_timeout_ms: 30_000,
        }
    }
}

/// How long finished work is kept before pruning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Processed events and finished tasks older than this are deleted
    pub keep_finished_days: u32,
    /// Pause between pruning passes of the event pump
    pub prune_interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            keep_finished_days: 30,
            prune_interval_secs: 3_600,
        }
    }
}

impl RetentionSettings {
    pub fn keep_finished(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.keep_finished_days))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// Top-level orchestration configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub policy: PolicyConfig,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    pub events: EventSettings,
    pub retention: RetentionSettings,
}

impl OrchestrationConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `BACKOFFICE_*` overrides read through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_AUTO_APPROVE_THRESHOLD")? {
            self.policy.auto_approve_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_ARITHMETIC_TOLERANCE")? {
            self.policy.arithmetic_tolerance = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_LARGE_AMOUNT")? {
            self.policy.large_amount_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_URGENT_AMOUNT")? {
            self.policy.urgent_amount_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_MAX_RETRIES")? {
            self.queue.default_max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_RETRY_BACKOFF_MS")? {
            self.queue.retry_backoff_ms = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_AUTOMATION_TIMEOUT_MS")? {
            self.worker.automation_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_STALE_CLAIM_SECS")? {
            self.worker.stale_claim_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_EVENT_BATCH_SIZE")? {
            self.events.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_COMMIT_TIMEOUT_MS")? {
            self.events.commit_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "BACKOFFICE_KEEP_FINISHED_DAYS")? {
            self.retention.keep_finished_days = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.policy.validate()?;
        if self.events.batch_size == 0 {
            return Err(ConfigError::Invalid("events.batch_size must be positive".into()));
        }
        if self.worker.automation_timeout_ms == 0 || self.events.commit_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.retention.keep_finished_days == 0 || self.retention.prune_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retention.keep_finished_days and retention.prune_interval_secs must be positive"
                    .into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ConfigResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}
