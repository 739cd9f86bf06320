//! Pipeline configuration.
//!
//! Defaults are overridable from `BANKSTATE_*` environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `BANKSTATE_MAX_CONCURRENCY` | [`PipelineConfig::max_concurrency`] |
//! | `BANKSTATE_MAX_BATCH_SIZE` | [`PipelineConfig::max_batch_size`] |
//! | `BANKSTATE_API_BASE_URL` | [`ExternalConfig::base_url`] |
//! | `BANKSTATE_API_KEY` | [`ExternalConfig::api_key`] |
//! | `BANKSTATE_API_TIMEOUT_SECS` | [`ExternalConfig::timeout`] |
//! | `BANKSTATE_API_MAX_RETRIES` | [`ExternalConfig::max_retries`] |

use crate::error::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.docuclipper.com/v1";

/// Settings for the external extraction provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts after a retryable failure.
    pub max_retries: u32,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Worker threads used by batch processing.
    pub max_concurrency: usize,
    /// Largest batch accepted in one call.
    pub max_batch_size: usize,
    pub external: ExternalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_batch_size: 100,
            external: ExternalConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("BANKSTATE_MAX_CONCURRENCY") {
            config.max_concurrency = parse_var("BANKSTATE_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("BANKSTATE_MAX_BATCH_SIZE") {
            config.max_batch_size = parse_var("BANKSTATE_MAX_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("BANKSTATE_API_BASE_URL") {
            config.external.base_url = value.trim_end_matches('/').to_string();
        }
        config.external.api_key = lookup("BANKSTATE_API_KEY").filter(|key| !key.trim().is_empty());
        if let Some(value) = lookup("BANKSTATE_API_TIMEOUT_SECS") {
            let secs = parse_var("BANKSTATE_API_TIMEOUT_SECS", &value)?;
            config.external.timeout = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("BANKSTATE_API_MAX_RETRIES") {
            config.external.max_retries = parse_var("BANKSTATE_API_MAX_RETRIES", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Validation("max_concurrency must be at least 1".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Validation("max_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("Invalid value for {}: {}", name, value)))
}
