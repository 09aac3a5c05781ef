use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{DestinationRef, FilesystemDestination, MemoryDestination};
use crate::error::DestinationError;

/// Free-form backend settings, as written under a destination in config.
pub type DestinationSettings = serde_json::Map<String, Value>;

/// Builds a destination from its settings.
pub type DestinationConstructor = Arc<
    dyn Fn(DestinationSettings) -> BoxFuture<'static, Result<DestinationRef, DestinationError>>
        + Send
        + Sync,
>;

/// Destination backends by type name.
#[derive(Clone, Default)]
pub struct DestinationRegistry {
    constructors: BTreeMap<String, DestinationConstructor>,
}

impl std::fmt::Debug for DestinationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `memory` and `filesystem`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_settings| {
            async { Ok(Arc::new(MemoryDestination::new()) as DestinationRef) }.boxed()
        });
        registry.register("filesystem", |settings| {
            async move {
                let path = required_string(&settings, "filesystem", "path")?;
                let destination = FilesystemDestination::open(PathBuf::from(path)).await?;
                Ok(Arc::new(destination) as DestinationRef)
            }
            .boxed()
        });
        registry
    }

    /// Register `kind`, replacing any earlier constructor for it.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(DestinationSettings) -> BoxFuture<'static, Result<DestinationRef, DestinationError>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub async fn build(
        &self,
        kind: &str,
        settings: DestinationSettings,
    ) -> Result<DestinationRef, DestinationError> {
        let constructor =
            self.constructors
                .get(kind)
                .ok_or_else(|| DestinationError::InvalidSettings {
                    kind: kind.to_string(),
                    message: format!(
                        "unknown destination type (known: {})",
                        self.kinds().collect::<Vec<_>>().join(", ")
                    ),
                })?;
        constructor(settings).await
    }
}

fn required_string(
    settings: &DestinationSettings,
    kind: &str,
    key: &str,
) -> Result<String, DestinationError> {
    match settings.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        _ => Err(DestinationError::InvalidSettings {
            kind: kind.to_string(),
            message: format!("'{key}' must be a non-empty string"),
        }),
    }
}
