//! Common configuration types shared between drift and floe.

mod loader;
mod path;
mod vars;

pub use loader::{Mergeable, load_from_paths, merge_section};
pub use path::{CliArgs, ConfigPath, is_yaml_file};
pub use vars::{InterpolationResult, interpolate};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, ZeroValueSnafu};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is started (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    crate::metrics::DEFAULT_METRICS_ADDR.to_string()
}

/// Where closed buffer files are uploaded.
///
/// The URL selects the backend: `memory://`, `file:///path` or a bare absolute
/// path, `s3://bucket/prefix`, `gs://bucket/prefix`, or an Azure `abfss://`/https URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobStoreConfig {
    pub url: String,
    /// Backend options (credentials, region, endpoint, ...).
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            options: HashMap::new(),
        }
    }
}

/// Handoff queue backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum QueueConfig {
    /// Process-local queue. Only useful when producer and consumer share a process.
    Memory {
        #[serde(default = "default_visibility_timeout_secs")]
        visibility_timeout_secs: u64,
    },
    /// Durable queue stored as one file per message under `path`.
    Directory {
        path: PathBuf,
        #[serde(default = "default_visibility_timeout_secs")]
        visibility_timeout_secs: u64,
    },
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::Memory {
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

impl QueueConfig {
    /// How long a dequeued message stays hidden before it is redelivered.
    pub fn visibility_timeout(&self) -> Duration {
        match self {
            QueueConfig::Memory {
                visibility_timeout_secs,
            }
            | QueueConfig::Directory {
                visibility_timeout_secs,
                ..
            } => Duration::from_secs(*visibility_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.visibility_timeout().is_zero() {
            return ZeroValueSnafu {
                field: "queue.visibility_timeout_secs",
            }
            .fail();
        }
        Ok(())
    }
}

/// Exponential backoff policy used for retried remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_yaml() {
        let config: QueueConfig =
            serde_yaml::from_str("type: directory\npath: /var/lib/drift/queue").unwrap();
        assert_eq!(
            config,
            QueueConfig::Directory {
                path: PathBuf::from("/var/lib/drift/queue"),
                visibility_timeout_secs: 300,
            }
        );
        assert_eq!(config.visibility_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_queue_config_rejects_unknown_type() {
        let result: Result<QueueConfig, _> = serde_yaml::from_str("type: kafka");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_visibility_timeout_invalid() {
        let config = QueueConfig::Memory {
            visibility_timeout_secs: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
        assert_eq!(retry.backoff(5), Duration::from_millis(1_000));
        assert_eq!(retry.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_blob_store_default_is_memory() {
        let config: BlobStoreConfig = serde_yaml::from_str("url: memory://").unwrap();
        assert_eq!(config, BlobStoreConfig::default());
    }
}
