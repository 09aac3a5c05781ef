//! Name-to-constructor registry for flattening strategies.
//!
//! The registry is filled at startup (built-ins plus anything the embedding
//! application registers) and turned into a [`Flatteners`] set that the
//! ingest path looks strategies up in.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::{
    DocumentIds, Flattener, HorizontalFlattener, MultiTableFlattener, RowIds, VerticalFlattener,
};
use crate::error::ConfigError;

/// Everything a strategy constructor may need.
#[derive(Debug, Clone)]
pub struct FlattenContext {
    pub separator: String,
    pub order_tags: bool,
    /// `None` disables document id stamping.
    pub document_ids: Option<Arc<dyn DocumentIds>>,
    pub row_ids: Arc<dyn RowIds>,
}

pub type FlattenerConstructor = Arc<dyn Fn(&FlattenContext) -> Arc<dyn Flattener> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FlattenerRegistry {
    constructors: IndexMap<String, FlattenerConstructor>,
}

impl std::fmt::Debug for FlattenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

impl FlattenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `horizontal`, `vertical` and `multitable`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("horizontal", |ctx| {
            Arc::new(HorizontalFlattener::new(ctx.separator.clone()))
        });
        registry.register("vertical", |ctx| {
            Arc::new(VerticalFlattener::new(
                ctx.document_ids.clone(),
                ctx.order_tags,
            ))
        });
        registry.register("multitable", |ctx| {
            Arc::new(MultiTableFlattener::new(ctx.row_ids.clone()))
        });
        registry
    }

    /// Add or replace a strategy.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&FlattenContext) -> Arc<dyn Flattener> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiate every registered strategy.
    pub fn build(&self, ctx: &FlattenContext, default: &str) -> Result<Flatteners, ConfigError> {
        let by_name: IndexMap<String, Arc<dyn Flattener>> = self
            .constructors
            .iter()
            .map(|(name, constructor)| (name.clone(), constructor(ctx)))
            .collect();

        let Some(default) = by_name.get(default).cloned() else {
            return Err(ConfigError::UnknownType {
                kind: "flattener".to_string(),
                name: default.to_string(),
                known: self.names().collect::<Vec<_>>().join(", "),
            });
        };

        Ok(Flatteners { by_name, default })
    }
}

/// Instantiated strategies, shared by all ingest requests.
#[derive(Debug, Clone)]
pub struct Flatteners {
    by_name: IndexMap<String, Arc<dyn Flattener>>,
    default: Arc<dyn Flattener>,
}

impl Flatteners {
    pub fn get(&self, name: &str) -> Option<Arc<dyn Flattener>> {
        self.by_name.get(name).cloned()
    }

    /// Look a strategy up by name, falling back to the default for missing
    /// or unknown names.
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn Flattener> {
        match name {
            Some(name) => self.get(name).unwrap_or_else(|| {
                debug!(strategy = name, fallback = self.default.name(), "Unknown flattener");
                self.default.clone()
            }),
            None => self.default.clone(),
        }
    }

    pub fn default_flattener(&self) -> &Arc<dyn Flattener> {
        &self.default
    }
}
