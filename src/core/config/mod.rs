//! Typed configuration surface (spec §6).
//!
//! `CleanupConfig` aggregates every recognized option into a single typed
//! record built once and validated eagerly at construction time, per the
//! "replace dict-like config merges with a typed configuration record"
//! design note (spec §9). Unknown keys are a deserialization error.

mod validation;

pub use validation::*;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{CleanupError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchingConfig {
    #[serde(default = "BatchingConfig::default_min")]
    pub min: usize,
    #[serde(default = "BatchingConfig::default_max")]
    pub max: usize,
    #[serde(default = "BatchingConfig::default_target_seconds")]
    pub target_seconds: f64,
    #[serde(default = "BatchingConfig::default_adaptive")]
    pub adaptive: bool,
    #[serde(default = "BatchingConfig::default_max_retries")]
    pub max_retries: u32,
}

impl BatchingConfig {
    pub const fn default_min() -> usize {
        50
    }
    pub const fn default_max() -> usize {
        100
    }
    pub const fn default_target_seconds() -> f64 {
        3.0
    }
    pub const fn default_adaptive() -> bool {
        true
    }
    pub const fn default_max_retries() -> u32 {
        3
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            min: Self::default_min(),
            max: Self::default_max(),
            target_seconds: Self::default_target_seconds(),
            adaptive: Self::default_adaptive(),
            max_retries: Self::default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_ttl_hours")]
    pub ttl_hours: u64,
    #[serde(default = "CacheConfig::default_max_size_mib")]
    pub max_size_mib: u64,
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "CacheConfig::default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

impl CacheConfig {
    pub const fn default_ttl_hours() -> u64 {
        24
    }
    pub const fn default_max_size_mib() -> u64 {
        100
    }
    pub const fn default_max_entries() -> usize {
        10_000
    }
    pub const fn default_cleanup_interval_hours() -> u64 {
        6
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: Self::default_ttl_hours(),
            max_size_mib: Self::default_max_size_mib(),
            max_entries: Self::default_max_entries(),
            cleanup_interval_hours: Self::default_cleanup_interval_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    #[serde(default = "BreakerConfig::default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "BreakerConfig::default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: u64,
}

impl BreakerConfig {
    pub const fn default_failure_threshold() -> u32 {
        5
    }
    pub const fn default_recovery_timeout_seconds() -> u64 {
        60
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            recovery_timeout_seconds: Self::default_recovery_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default = "LlmConfig::default_temperature")]
    pub temperature: f64,
    #[serde(default = "LlmConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "LlmConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "LlmConfig::default_provider")]
    pub provider: String,
    #[serde(default = "LlmConfig::default_endpoint")]
    pub endpoint: String,
}

impl LlmConfig {
    pub fn default_model() -> String {
        "gpt-4".to_string()
    }
    pub const fn default_temperature() -> f64 {
        0.1
    }
    pub const fn default_max_tokens() -> u32 {
        4096
    }
    pub const fn default_timeout_seconds() -> u64 {
        30
    }
    pub fn default_provider() -> String {
        "openai".to_string()
    }
    pub fn default_endpoint() -> String {
        "https://api.openai.com/v1/chat/completions".to_string()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            timeout_seconds: Self::default_timeout_seconds(),
            provider: Self::default_provider(),
            endpoint: Self::default_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    #[serde(default = "CleanupConfig::default_max_daily_requests")]
    pub max_daily_requests: u64,
    #[serde(default = "CleanupConfig::default_max_daily_tokens")]
    pub max_daily_tokens: u64,
    #[serde(default = "CleanupConfig::default_max_daily_cost")]
    pub max_daily_cost: f64,
    #[serde(default = "CleanupConfig::default_max_session_cost")]
    pub max_session_cost: f64,
    #[serde(default = "CleanupConfig::default_cost_per_request")]
    pub cost_per_request: f64,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Whether the safety layer is consulted during fusion (§4.1 step 5).
    #[serde(default = "CleanupConfig::default_safety_enabled")]
    pub safety_enabled: bool,
}

impl CleanupConfig {
    pub const fn default_max_daily_requests() -> u64 {
        1000
    }
    pub const fn default_max_daily_tokens() -> u64 {
        50_000
    }
    pub const fn default_max_daily_cost() -> f64 {
        5.0
    }
    pub const fn default_max_session_cost() -> f64 {
        0.10
    }
    pub const fn default_cost_per_request() -> f64 {
        0.002
    }
    pub const fn default_safety_enabled() -> bool {
        true
    }

    /// Validate the configuration, raising eagerly at construction time
    /// rather than allowing a malformed config to fail mysteriously deep
    /// inside `analyze()`.
    pub fn validate(&self) -> Result<()> {
        if self.batching.min == 0 {
            return Err(CleanupError::config_field(
                "batching.min must be greater than 0",
                "batching.min",
            ));
        }
        if self.batching.min > self.batching.max {
            return Err(CleanupError::config_field(
                "batching.min must be <= batching.max",
                "batching.min",
            ));
        }
        validate_positive_f64(self.batching.target_seconds, "batching.target_seconds")?;
        if self.batching.max_retries == 0 {
            return Err(CleanupError::config_field(
                "batching.max_retries must be greater than 0",
                "batching.max_retries",
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(CleanupError::config_field(
                "cache.max_entries must be greater than 0",
                "cache.max_entries",
            ));
        }
        validate_positive_u64(self.cache.max_size_mib, "cache.max_size_mib")?;
        validate_positive_u32(self.breaker.failure_threshold, "breaker.failure_threshold")?;
        validate_unit_range(self.llm.temperature, "llm.temperature")?;
        if self.llm.model.trim().is_empty() {
            return Err(CleanupError::config_field(
                "llm.model must not be empty",
                "llm.model",
            ));
        }
        validate_non_negative(self.cost_per_request, "cost_per_request")?;
        validate_non_negative(self.max_daily_cost, "max_daily_cost")?;
        validate_non_negative(self.max_session_cost, "max_session_cost")?;
        Ok(())
    }

    /// Load a config file, dispatching on extension: `.yaml`/`.yml` is
    /// parsed as YAML, everything else as JSON. Mirrors the teacher's own
    /// `from_yaml_file` but widened to the JSON/YAML flexibility spec §6
    /// documents for this crate's config surface.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_daily_requests: Self::default_max_daily_requests(),
            max_daily_tokens: Self::default_max_daily_tokens(),
            max_daily_cost: Self::default_max_daily_cost(),
            max_session_cost: Self::default_max_session_cost(),
            cost_per_request: Self::default_cost_per_request(),
            batching: BatchingConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            llm: LlmConfig::default(),
            safety_enabled: Self::default_safety_enabled(),
        }
    }
}

#[cfg(test)]
mod tests;
