//! Configuration for the drift ingest service.
//!
//! ```yaml
//! buffer:
//!   scratch_dir: /var/lib/drift/scratch
//!   max_file_size_bytes: 104857600
//!   max_rows: 1000
//!   max_file_age_ms: 3600000
//!   min_free_disk_bytes: 1073741824
//! handoff:
//!   max_concurrent: 4
//! flatten:
//!   default_strategy: vertical
//! blob_store:
//!   url: s3://landing/drift
//! queue:
//!   type: directory
//!   path: /var/lib/drift/queue
//! destinations:
//!   acme:
//!     flatten: multitable
//! ```
//!
//! Sections may be split over several files (`-c` / `-C`); each section may
//! appear in only one file and each destination only once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use drift_core::config::{Mergeable, load_from_paths, merge_section};
pub use drift_core::config::{
    BlobStoreConfig, CliArgs, ConfigPath, MB, MetricsConfig, QueueConfig, RetryConfig,
};

/// Rotation thresholds and scratch location for the ingest buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Root of `<destination>/<table>/<id>.ndjson` buffer files.
    pub scratch_dir: PathBuf,
    /// Rotate before a row would push the file past this size.
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    /// Rotate once a file holds this many rows.
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    /// Rotate a non-empty file once it has been open this long.
    #[serde(default = "default_max_file_age_ms")]
    pub max_file_age_ms: u64,
    /// Reject writes when less than this much disk would remain free.
    #[serde(default)]
    pub min_free_disk_bytes: u64,
    /// How often the background sweep looks for aged files.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Closed files that may wait for the handoff producer.
    #[serde(default = "default_handoff_channel_capacity")]
    pub handoff_channel_capacity: usize,
}

fn default_max_file_size_bytes() -> u64 {
    100 * MB as u64
}

fn default_max_rows() -> u64 {
    1000
}

fn default_max_file_age_ms() -> u64 {
    60 * 60 * 1000
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_handoff_channel_capacity() -> usize {
    64
}

impl BufferConfig {
    /// Config with default thresholds rooted at `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_rows: default_max_rows(),
            max_file_age_ms: default_max_file_age_ms(),
            min_free_disk_bytes: 0,
            sweep_interval_ms: default_sweep_interval_ms(),
            handoff_channel_capacity: default_handoff_channel_capacity(),
        }
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_millis(self.max_file_age_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("buffer.max_file_size_bytes", self.max_file_size_bytes),
            ("buffer.max_rows", self.max_rows),
            ("buffer.max_file_age_ms", self.max_file_age_ms),
            ("buffer.sweep_interval_ms", self.sweep_interval_ms),
            (
                "buffer.handoff_channel_capacity",
                self.handoff_channel_capacity as u64,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue {
                    field: field.to_string(),
                });
            }
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "buffer.scratch_dir".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Handoff producer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffConfig {
    /// Closed files handed off concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    /// How long shutdown waits for outstanding handoffs before leaving them
    /// on disk for the next start.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry: RetryConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl HandoffConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Flattening defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlattenConfig {
    /// Strategy used when a request names none (or an unknown one).
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    /// Joins nested keys in horizontal flattening.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Emit `__order_<path>` columns in vertical flattening.
    #[serde(default = "default_true")]
    pub order_tags: bool,
    /// Stamp `___document_id` in vertical flattening.
    #[serde(default = "default_true")]
    pub document_ids: bool,
    /// Node bits of generated multi-table row ids. Random when unset.
    #[serde(default)]
    pub node_id: Option<u16>,
}

fn default_strategy() -> String {
    "horizontal".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
            separator: default_separator(),
            order_tags: true,
            document_ids: true,
            node_id: None,
        }
    }
}

/// Per-destination ingest settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationIngestConfig {
    /// Strategy used for this destination when a request names none.
    #[serde(default)]
    pub flatten: Option<String>,
}

/// One config file as written on disk. Every section is optional so that
/// files can be merged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    buffer: Option<BufferConfig>,
    handoff: Option<HandoffConfig>,
    flatten: Option<FlattenConfig>,
    blob_store: Option<BlobStoreConfig>,
    queue: Option<QueueConfig>,
    metrics: Option<MetricsConfig>,
    #[serde(default)]
    destinations: IndexMap<String, DestinationIngestConfig>,
}

impl Mergeable for ConfigFile {
    type Key = String;
    type Component = DestinationIngestConfig;

    fn components_mut(&mut self) -> &mut IndexMap<String, DestinationIngestConfig> {
        &mut self.destinations
    }

    fn merge_sections(&mut self, other: &mut Self) -> Result<(), ConfigError> {
        merge_section("buffer", &mut self.buffer, other.buffer.take())?;
        merge_section("handoff", &mut self.handoff, other.handoff.take())?;
        merge_section("flatten", &mut self.flatten, other.flatten.take())?;
        merge_section("blob_store", &mut self.blob_store, other.blob_store.take())?;
        merge_section("queue", &mut self.queue, other.queue.take())?;
        merge_section("metrics", &mut self.metrics, other.metrics.take())
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
    }
}

/// Fully resolved drift configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub buffer: BufferConfig,
    pub handoff: HandoffConfig,
    pub flatten: FlattenConfig,
    pub blob_store: BlobStoreConfig,
    pub queue: QueueConfig,
    pub metrics: MetricsConfig,
    /// When non-empty, only these destinations are accepted.
    pub destinations: IndexMap<String, DestinationIngestConfig>,
}

impl Config {
    /// Load and merge configuration from files and directories.
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        Self::resolve(load_from_paths::<ConfigFile>(paths)?)
    }

    /// Parse configuration from a single YAML document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = drift_core::config::interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }
        Self::resolve(ConfigFile::parse_yaml(&result.text)?)
    }

    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let Some(buffer) = file.buffer else {
            return Err(ConfigError::InvalidValue {
                field: "buffer".to_string(),
                message: "section is required (at least buffer.scratch_dir)".to_string(),
            });
        };

        let config = Self {
            buffer,
            handoff: file.handoff.unwrap_or_default(),
            flatten: file.flatten.unwrap_or_default(),
            blob_store: file.blob_store.unwrap_or_default(),
            queue: file.queue.unwrap_or_default(),
            metrics: file.metrics.unwrap_or_default(),
            destinations: file.destinations,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.buffer.validate()?;
        self.queue.validate()?;
        if self.handoff.max_concurrent == 0 {
            return Err(ConfigError::ZeroValue {
                field: "handoff.max_concurrent".to_string(),
            });
        }
        if self.flatten.separator.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "flatten.separator".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Whether ingest for `destination_id` is allowed.
    pub fn accepts(&self, destination_id: &str) -> bool {
        self.destinations.is_empty() || self.destinations.contains_key(destination_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse("buffer:\n  scratch_dir: /tmp/drift\n").unwrap();
        assert_eq!(config.buffer.max_rows, 1000);
        assert_eq!(config.buffer.max_file_size_bytes, 100 * 1024 * 1024);
        assert_eq!(config.buffer.max_file_age(), Duration::from_secs(3600));
        assert_eq!(config.flatten.default_strategy, "horizontal");
        assert_eq!(config.blob_store.url, "memory://");
        assert!(config.accepts("anyone"));
    }

    #[test]
    fn test_buffer_section_required() {
        let err = Config::parse("handoff:\n  max_concurrent: 2\n").unwrap_err();
        assert!(err.to_string().contains("buffer"));
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let err = Config::parse("buffer:\n  scratch_dir: /tmp/d\n  max_rows: 0\n").unwrap_err();
        assert!(err.to_string().contains("buffer.max_rows"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::parse("buffer:\n  scratch_dir: /tmp/d\n  max_rowz: 5\n").is_err());
    }

    #[test]
    fn test_destination_allow_list() {
        let config = Config::parse(
            "buffer:\n  scratch_dir: /tmp/d\ndestinations:\n  acme:\n    flatten: vertical\n  globex: {}\n",
        )
        .unwrap();
        assert!(config.accepts("acme"));
        assert!(config.accepts("globex"));
        assert!(!config.accepts("initech"));
        assert_eq!(
            config.destinations["acme"].flatten.as_deref(),
            Some("vertical")
        );
    }

    #[test]
    fn test_split_files_merge() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("00-buffer.yaml"),
            "buffer:\n  scratch_dir: /tmp/d\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("10-queue.yaml"),
            "queue:\n  type: directory\n  path: /tmp/q\n",
        )
        .unwrap();

        let config = Config::from_paths(&[ConfigPath::dir(dir.path())]).unwrap();
        assert_eq!(config.buffer.scratch_dir, PathBuf::from("/tmp/d"));
        assert!(matches!(config.queue, QueueConfig::Directory { .. }));
    }
}
