//! Engine configuration.
//!
//! Values are deserialized from JSON (the worker reads the marketplace map
//! from a file) and checked once at startup with [`EtlConfig::validate`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::Marketplace;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlConfig {
    /// Rows per flushed batch (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on pages fetched by one execution (default: 1000).
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Directory downloaded snapshots are written to.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Delete snapshot files once ingested (default: true).
    #[serde(default = "default_delete_snapshots")]
    pub delete_snapshots: bool,

    /// Registry entries idle for longer than this are evicted (default: 6h).
    #[serde(default = "default_registry_ttl", rename = "registryTtlMs", with = "duration_ms")]
    pub registry_ttl: Duration,

    /// Wait before re-checking an unmet event dependency (default: 2s).
    #[serde(
        default = "default_dependency_retry_delay",
        rename = "dependencyRetryDelayMs",
        with = "duration_ms"
    )]
    pub dependency_retry_delay: Duration,

    #[serde(default)]
    pub marketplaces: BTreeMap<Marketplace, MarketplaceConfig>,
}

fn default_batch_size() -> usize {
    500
}

fn default_max_pages() -> usize {
    1000
}

fn default_snapshot_dir() -> PathBuf {
    std::env::temp_dir().join("marketsync-snapshots")
}

fn default_delete_snapshots() -> bool {
    true
}

fn default_registry_ttl() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_dependency_retry_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_pages: default_max_pages(),
            snapshot_dir: default_snapshot_dir(),
            delete_snapshots: default_delete_snapshots(),
            registry_ttl: default_registry_ttl(),
            dependency_retry_delay: default_dependency_retry_delay(),
            marketplaces: BTreeMap::new(),
        }
    }
}

impl EtlConfig {
    /// Returns the configuration of a marketplace, or a configuration error.
    pub fn marketplace(&self, marketplace: Marketplace) -> Result<&MarketplaceConfig, ConfigError> {
        self.marketplaces
            .get(&marketplace)
            .ok_or(ConfigError::MarketplaceNotConfigured(marketplace))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batchSize", "must be positive"));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::invalid("maxPages", "must be positive"));
        }
        if self.dependency_retry_delay.is_zero() {
            return Err(ConfigError::invalid("dependencyRetryDelayMs", "must be positive"));
        }
        for (marketplace, config) in &self.marketplaces {
            config.validate(*marketplace)?;
        }
        Ok(())
    }
}

/// Connection and resilience settings of one marketplace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceConfig {
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Seller/client identifier sent alongside the key by providers that need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// End-to-end HTTP request timeout (default: 60s).
    #[serde(default = "default_request_timeout", rename = "requestTimeoutMs", with = "duration_ms")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub resilience: ResilienceConfig,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl MarketplaceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            client_id: None,
            request_timeout: default_request_timeout(),
            resilience: ResilienceConfig::default(),
        }
    }

    pub fn validate(&self, marketplace: Marketplace) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::BlankBaseUrl(marketplace));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                format!("{}.requestTimeoutMs", marketplace),
                "must be positive",
            ));
        }
        self.resilience.validate(marketplace)
    }
}

/// Limits and retry settings applied per marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceConfig {
    /// Permits granted per one-second period.
    #[serde(default = "default_limit_for_period")]
    pub limit_for_period: u32,

    /// Concurrent in-flight calls per marketplace.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: u32,

    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff", rename = "baseBackoffMs", with = "duration_ms")]
    pub base_backoff: Duration,

    /// Cap on the exponential part of the backoff; jitter is added on top.
    #[serde(default = "default_max_backoff", rename = "maxBackoffMs", with = "duration_ms")]
    pub max_backoff: Duration,

    #[serde(default = "default_max_jitter", rename = "maxJitterMs", with = "duration_ms")]
    pub max_jitter: Duration,

    /// Delay used for a 429 without a usable retry hint.
    #[serde(
        default = "default_retry_after_fallback",
        rename = "retryAfterFallbackMs",
        with = "duration_ms"
    )]
    pub retry_after_fallback: Duration,
}

fn default_limit_for_period() -> u32 {
    10
}

fn default_max_concurrent_calls() -> u32 {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_max_jitter() -> Duration {
    Duration::from_millis(500)
}

fn default_retry_after_fallback() -> Duration {
    Duration::from_secs(10)
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            limit_for_period: default_limit_for_period(),
            max_concurrent_calls: default_max_concurrent_calls(),
            max_attempts: default_max_attempts(),
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
            max_jitter: default_max_jitter(),
            retry_after_fallback: default_retry_after_fallback(),
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self, marketplace: Marketplace) -> Result<(), ConfigError> {
        let field = |name: &str| format!("{}.resilience.{}", marketplace, name);
        if self.limit_for_period == 0 {
            return Err(ConfigError::invalid(field("limitForPeriod"), "must be positive"));
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::invalid(field("maxConcurrentCalls"), "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(field("maxAttempts"), "must be positive"));
        }
        if self.max_backoff < self.base_backoff {
            return Err(ConfigError::invalid(
                field("maxBackoffMs"),
                "must not be lower than baseBackoffMs",
            ));
        }
        Ok(())
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: EtlConfig = serde_json::from_str(
            r#"{
                "marketplaces": {
                    "OZON": {
                        "baseUrl": "https://api-seller.ozon.ru",
                        "apiKey": "secret",
                        "resilience": { "limitForPeriod": 3, "baseBackoffMs": 250 }
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_pages, 1000);
        assert!(config.delete_snapshots);
        assert_eq!(config.registry_ttl, Duration::from_secs(21_600));
        assert_eq!(config.dependency_retry_delay, Duration::from_secs(2));

        let ozon = config.marketplace(Marketplace::Ozon).unwrap();
        assert_eq!(ozon.request_timeout, Duration::from_secs(60));
        assert_eq!(ozon.resilience.limit_for_period, 3);
        assert_eq!(ozon.resilience.base_backoff, Duration::from_millis(250));
        assert_eq!(ozon.resilience.max_attempts, 5);
        assert!(config.validate().is_ok());

        assert!(matches!(
            config.marketplace(Marketplace::Wildberries),
            Err(ConfigError::MarketplaceNotConfigured(Marketplace::Wildberries))
        ));
    }

    #[test]
    fn blank_base_url_fails_validation() {
        let mut config = EtlConfig::default();
        config
            .marketplaces
            .insert(Marketplace::Wildberries, MarketplaceConfig::new("  "));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlankBaseUrl(Marketplace::Wildberries))
        ));
    }

    #[test]
    fn non_positive_limits_fail_validation() {
        let mut config = EtlConfig::default();
        let mut marketplace = MarketplaceConfig::new("https://example.test");
        marketplace.resilience.max_concurrent_calls = 0;
        config.marketplaces.insert(Marketplace::Ozon, marketplace);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("maxConcurrentCalls"));

        let zero_batch = EtlConfig {
            batch_size: 0,
            ..EtlConfig::default()
        };
        assert!(zero_batch.validate().is_err());

        let no_dependency_delay = EtlConfig {
            dependency_retry_delay: Duration::ZERO,
            ..EtlConfig::default()
        };
        assert!(no_dependency_delay.validate().is_err());
    }
}
