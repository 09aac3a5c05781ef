use dashmap::DashMap;
use indexmap::IndexMap;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tracing::info;

use super::{DestinationRef, DestinationRegistry};
use crate::config::DestinationConfig;
use crate::error::{ConsumerError, OpenDestinationSnafu};

/// Opens configured destinations on first use and keeps one instance per id.
#[derive(Debug)]
pub struct DestinationManager {
    registry: DestinationRegistry,
    configs: IndexMap<String, DestinationConfig>,
    opened: DashMap<String, DestinationRef>,
    /// Held while opening so two workers never open the same destination twice.
    open_lock: Mutex<()>,
}

impl DestinationManager {
    pub fn new(registry: DestinationRegistry, configs: IndexMap<String, DestinationConfig>) -> Self {
        Self {
            registry,
            configs,
            opened: DashMap::new(),
            open_lock: Mutex::new(()),
        }
    }

    pub fn destination_ids(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Register an already opened destination under `destination_id`.
    pub fn insert(&self, destination_id: impl Into<String>, destination: DestinationRef) {
        self.opened.insert(destination_id.into(), destination);
    }

    pub async fn get(&self, destination_id: &str) -> Result<DestinationRef, ConsumerError> {
        if let Some(destination) = self.opened.get(destination_id) {
            return Ok(destination.clone());
        }

        let _guard = self.open_lock.lock().await;
        if let Some(destination) = self.opened.get(destination_id) {
            return Ok(destination.clone());
        }

        let config = self.configs.get(destination_id).ok_or_else(|| {
            ConsumerError::UnknownDestination {
                destination_id: destination_id.to_string(),
            }
        })?;
        let destination = self
            .registry
            .build(&config.kind, config.settings.clone())
            .await
            .context(OpenDestinationSnafu { destination_id })?;

        info!(
            destination = destination_id,
            kind = destination.kind(),
            "Opened destination"
        );
        self.opened
            .insert(destination_id.to_string(), destination.clone());
        Ok(destination)
    }

    /// Open every configured destination, failing on the first bad one.
    pub async fn open_all(&self) -> Result<(), ConsumerError> {
        for destination_id in self.configs.keys() {
            self.get(destination_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::DestinationSettings;
    use std::sync::Arc;

    fn manager() -> DestinationManager {
        let mut configs = IndexMap::new();
        configs.insert(
            "acme".to_string(),
            DestinationConfig {
                kind: "memory".to_string(),
                settings: DestinationSettings::new(),
            },
        );
        configs.insert(
            "broken".to_string(),
            DestinationConfig {
                kind: "filesystem".to_string(),
                settings: DestinationSettings::new(),
            },
        );
        DestinationManager::new(DestinationRegistry::with_builtins(), configs)
    }

    #[tokio::test]
    async fn test_instances_are_cached() {
        let manager = manager();
        let a = manager.get("acme").await.unwrap();
        let b = manager.get("acme").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_unknown_and_broken_destinations() {
        let manager = manager();
        assert!(matches!(
            manager.get("initech").await,
            Err(ConsumerError::UnknownDestination { .. })
        ));
        assert!(matches!(
            manager.get("broken").await,
            Err(ConsumerError::OpenDestination { .. })
        ));
        assert!(manager.open_all().await.is_err());
    }
}
