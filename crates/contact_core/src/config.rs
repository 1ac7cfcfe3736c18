use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BackoffPolicy, StageKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("backoff factor must be at least 1.0, got {0}")]
    BackoffFactor(String),
    #[error("cache_ttl_unknown_secs ({unknown}) must not exceed cache_ttl_valid_secs ({valid})")]
    UnknownTtlTooLong { unknown: u64, valid: u64 },
}

/// Per-operation timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub page_fetch_ms: u64,
    pub domain_ms: u64,
    pub mx_ms: u64,
    pub spf_ms: u64,
    pub dkim_ms: u64,
    pub smtp_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            page_fetch_ms: 15_000,
            domain_ms: 5_000,
            mx_ms: 5_000,
            spf_ms: 5_000,
            dkim_ms: 5_000,
            smtp_ms: 10_000,
        }
    }
}

impl StageTimeouts {
    /// Same timeout for every operation; handy in tests.
    pub fn uniform(ms: u64) -> Self {
        Self {
            page_fetch_ms: ms,
            domain_ms: ms,
            mx_ms: ms,
            spf_ms: ms,
            dkim_ms: ms,
            smtp_ms: ms,
        }
    }

    pub fn page_fetch(&self) -> Duration {
        Duration::from_millis(self.page_fetch_ms)
    }

    /// Timeout for a verifier stage; `None` for stages without network IO.
    pub fn for_stage(&self, stage: StageKind) -> Option<Duration> {
        let ms = match stage {
            StageKind::Format => return None,
            StageKind::Domain => self.domain_ms,
            StageKind::Mx => self.mx_ms,
            StageKind::Spf => self.spf_ms,
            StageKind::Dkim => self.dkim_ms,
            StageKind::Smtp => self.smtp_ms,
        };
        Some(Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            factor: 2.0,
            max_ms: 60_000,
        }
    }
}

/// Settings consumed by the pipeline; owned and loaded by the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_workers: usize,
    pub per_host_min_interval_ms: u64,
    pub stage_timeouts: StageTimeouts,
    pub max_retry_attempts: u32,
    pub cache_ttl_valid_secs: u64,
    pub cache_ttl_unknown_secs: u64,
    pub backoff: BackoffConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 4,
            per_host_min_interval_ms: 1_000,
            stage_timeouts: StageTimeouts::default(),
            max_retry_attempts: 3,
            cache_ttl_valid_secs: 7 * 24 * 60 * 60,
            cache_ttl_unknown_secs: 60 * 60,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.stage_timeouts;
        let positive: [(&'static str, u64); 10] = [
            ("max_concurrent_workers", self.max_concurrent_workers as u64),
            ("stage_timeouts.page_fetch_ms", t.page_fetch_ms),
            ("stage_timeouts.domain_ms", t.domain_ms),
            ("stage_timeouts.mx_ms", t.mx_ms),
            ("stage_timeouts.spf_ms", t.spf_ms),
            ("stage_timeouts.dkim_ms", t.dkim_ms),
            ("stage_timeouts.smtp_ms", t.smtp_ms),
            ("cache_ttl_valid_secs", self.cache_ttl_valid_secs),
            ("cache_ttl_unknown_secs", self.cache_ttl_unknown_secs),
            ("backoff.base_ms", self.backoff.base_ms),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field: *field });
        }
        if !(self.backoff.factor >= 1.0 && self.backoff.factor.is_finite()) {
            return Err(ConfigError::BackoffFactor(self.backoff.factor.to_string()));
        }
        if self.cache_ttl_unknown_secs > self.cache_ttl_valid_secs {
            return Err(ConfigError::UnknownTtlTooLong {
                unknown: self.cache_ttl_unknown_secs,
                valid: self.cache_ttl_valid_secs,
            });
        }
        Ok(())
    }

    pub fn per_host_min_interval(&self) -> Duration {
        Duration::from_millis(self.per_host_min_interval_ms)
    }

    pub fn cache_ttl_valid(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_valid_secs)
    }

    pub fn cache_ttl_unknown(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_unknown_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff.base_ms),
            self.backoff.factor,
            Duration::from_millis(self.backoff.max_ms),
        )
    }
}
