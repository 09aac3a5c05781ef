//! Configuration for the floe consumer.
//!
//! ```yaml
//! consumer:
//!   workers: 4
//!   scratch_dir: /var/lib/floe/scratch
//!   evolution: merge
//! blob_store:
//!   url: s3://landing/drift
//! queue:
//!   type: directory
//!   path: /var/lib/drift/queue
//! destinations:
//!   acme:
//!     type: filesystem
//!     settings:
//!       path: /var/lib/floe/acme
//!   scratch:
//!     type: memory
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::destination::{DestinationRegistry, DestinationSettings};
use crate::error::ConfigError;
use crate::schema::SchemaEvolutionMode;
use drift_core::config::{Mergeable, load_from_paths, merge_section};
pub use drift_core::config::{BlobStoreConfig, CliArgs, ConfigPath, MB, MetricsConfig, QueueConfig};

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Concurrent workers, each processing one message at a time.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Sleep between polls of an empty queue.
    #[serde(default = "default_dequeue_interval_ms")]
    pub dequeue_interval_ms: u64,
    /// Where downloaded batches are staged before insert.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Free space to keep on the scratch volume on top of in-flight batches.
    #[serde(default)]
    pub min_free_disk_bytes: u64,
    /// Largest batch a worker expects to stage.
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    /// Sleep while the scratch volume is short of space.
    #[serde(default = "default_disk_backoff_ms")]
    pub disk_backoff_ms: u64,
    #[serde(default)]
    pub evolution: SchemaEvolutionMode,
}

fn default_workers() -> usize {
    4
}

fn default_dequeue_interval_ms() -> u64 {
    500
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("floe")
}

fn default_max_file_size_bytes() -> u64 {
    100 * MB as u64
}

fn default_disk_backoff_ms() -> u64 {
    5000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dequeue_interval_ms: default_dequeue_interval_ms(),
            scratch_dir: default_scratch_dir(),
            min_free_disk_bytes: 0,
            max_file_size_bytes: default_max_file_size_bytes(),
            disk_backoff_ms: default_disk_backoff_ms(),
            evolution: SchemaEvolutionMode::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn dequeue_interval(&self) -> Duration {
        Duration::from_millis(self.dequeue_interval_ms)
    }

    pub fn disk_backoff(&self) -> Duration {
        Duration::from_millis(self.disk_backoff_ms)
    }

    /// Free bytes needed on the scratch volume before taking another message.
    pub fn required_free_bytes(&self) -> u64 {
        self.min_free_disk_bytes
            .saturating_add((self.workers as u64).saturating_mul(self.max_file_size_bytes))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("consumer.workers", self.workers as u64),
            ("consumer.dequeue_interval_ms", self.dequeue_interval_ms),
            ("consumer.max_file_size_bytes", self.max_file_size_bytes),
            ("consumer.disk_backoff_ms", self.disk_backoff_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One destination: backend type plus backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: DestinationSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    consumer: Option<ConsumerConfig>,
    blob_store: Option<BlobStoreConfig>,
    queue: Option<QueueConfig>,
    metrics: Option<MetricsConfig>,
    #[serde(default)]
    destinations: IndexMap<String, DestinationConfig>,
}

impl Mergeable for ConfigFile {
    type Key = String;
    type Component = DestinationConfig;

    fn components_mut(&mut self) -> &mut IndexMap<String, DestinationConfig> {
        &mut self.destinations
    }

    fn merge_sections(&mut self, other: &mut Self) -> Result<(), ConfigError> {
        merge_section("consumer", &mut self.consumer, other.consumer.take())?;
        merge_section("blob_store", &mut self.blob_store, other.blob_store.take())?;
        merge_section("queue", &mut self.queue, other.queue.take())?;
        merge_section("metrics", &mut self.metrics, other.metrics.take())
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
    }
}

/// Fully resolved floe configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub consumer: ConsumerConfig,
    pub blob_store: BlobStoreConfig,
    pub queue: QueueConfig,
    pub metrics: MetricsConfig,
    pub destinations: IndexMap<String, DestinationConfig>,
}

impl Config {
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        Self::resolve(load_from_paths::<ConfigFile>(paths)?)
    }

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
        let config = Self {
            consumer: file.consumer.unwrap_or_default(),
            blob_store: file.blob_store.unwrap_or_default(),
            queue: file.queue.unwrap_or_default(),
            metrics: file.metrics.unwrap_or_default(),
            destinations: file.destinations,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consumer.validate()?;
        self.queue.validate()
    }

    /// Check that every destination names a type `registry` can build.
    pub fn check_destination_types(&self, registry: &DestinationRegistry) -> Result<(), ConfigError> {
        for destination in self.destinations.values() {
            if !registry.contains(&destination.kind) {
                return Err(ConfigError::UnknownType {
                    kind: "destination".to_string(),
                    name: destination.kind.clone(),
                    known: registry.kinds().collect::<Vec<_>>().join(", "),
                });
            }
        }
        Ok(())
    }
}
