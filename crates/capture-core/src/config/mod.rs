//! Sync configuration shared by the CLI and any embedding app.
//!
//! `SyncConfig` names the remote authority, the tables to replicate and the
//! timing of the background scheduler. Secrets (access tokens) are never part
//! of it; they are supplied separately when the remote adapter is built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::TableName;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_MAX_RETRIES: u32 = 8;

/// Replication settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the remote table API
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Tables replicated by each cycle
    #[serde(default = "default_tables")]
    pub tables: Vec<TableName>,
    /// Seconds between scheduled cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// First retry delay after a network failure
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound for the retry delay
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Consecutive failures tolerated before the scheduler reports `Error`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            tables: default_tables(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given remote with default timings
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: Some(remote_url.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tables(mut self, tables: Vec<TableName>) -> Self {
        self.tables = tables;
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs();
        self
    }

    /// Check if a remote authority is configured
    pub const fn is_configured(&self) -> bool {
        self.remote_url.is_some()
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Delay before retry number `attempt` (1-based), doubling up to `retry_max_ms`
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .retry_base_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.retry_max_ms);
        Duration::from_millis(delay)
    }

    /// Normalize and validate, returning a descriptive message on failure.
    pub fn validated(self) -> Result<Self, String> {
        let remote_url = match normalize_text_option(self.remote_url) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => return Err("remote_url must include http:// or https://".to_string()),
            None => None,
        };

        if self.tables.is_empty() {
            return Err("at least one table must be synced".to_string());
        }
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than zero".to_string());
        }
        if self.retry_base_ms == 0 || self.retry_base_ms > self.retry_max_ms {
            return Err("retry_base_ms must be positive and not exceed retry_max_ms".to_string());
        }

        let mut tables = self.tables;
        tables.sort();
        tables.dedup();

        Ok(Self {
            remote_url,
            tables,
            ..self
        })
    }
}

/// Parse and validate a JSON sync configuration.
pub fn parse_sync_config(payload: &str) -> Result<SyncConfig, String> {
    let config: SyncConfig = serde_json::from_str(payload)
        .map_err(|error| format!("invalid sync config JSON: {error}"))?;
    config.validated()
}

fn default_tables() -> Vec<TableName> {
    vec![TableName::rows(), TableName::files()]
}

const fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

const fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}

const fn default_retry_max_ms() -> u64 {
    DEFAULT_RETRY_MAX_MS
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
