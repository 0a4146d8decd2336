//! Dependency Index
//!
//! The index is the per-type answer to "what reacts when `name` changes":
//! the derived properties that re-announce, and the handler edges that may
//! run. It is built from [`Observable::declare`] and never changes after.
//!
//! # Caching
//!
//! Indexes are cached for the lifetime of the process, keyed by `TypeId`.
//! Building happens outside of any lock. If two threads build the same
//! type's index at once, the first to publish wins and the other discards
//! its copy, so every caller sees the same `Arc`.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::debug;

use super::declare::{Declarations, Getter, HandlerEdge, HandlerEdges};
use super::store::Observable;
use crate::error::DeclarationError;

type Registry = DashMap<TypeId, Arc<dyn Any + Send + Sync>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(DashMap::new)
}

/// Immutable map from source names to their dependents for one type.
pub struct DependencyIndex<T> {
    type_name: &'static str,
    properties: IndexMap<String, Getter<T>>,
    echoes: IndexMap<String, IndexSet<String>>,
    handlers: IndexMap<String, HandlerEdges<T>>,
}

impl<T: Observable> DependencyIndex<T> {
    /// Get the cached index for `T`, building it on first use.
    pub fn of() -> Result<Arc<Self>, DeclarationError> {
        let key = TypeId::of::<T>();

        if let Some(entry) = registry().get(&key) {
            let cached = Arc::clone(entry.value());
            drop(entry);
            return Ok(Self::downcast(cached));
        }

        let built: Arc<dyn Any + Send + Sync> = Arc::new(Self::build()?);
        let published = Arc::clone(registry().entry(key).or_insert(built).value());

        Ok(Self::downcast(published))
    }

    /// Build a fresh index for `T` without touching the cache.
    pub fn build() -> Result<Self, DeclarationError> {
        let mut decl = Declarations::new();
        T::declare(&mut decl)?;
        decl.validate()?;

        let index = Self {
            type_name: std::any::type_name::<T>(),
            properties: decl.properties,
            echoes: decl.echoes,
            handlers: decl.handlers,
        };

        debug!(
            type_name = index.type_name,
            properties = index.properties.len(),
            echo_sources = index.echoes.len(),
            handler_sources = index.handlers.len(),
            "built dependency index"
        );

        Ok(index)
    }

    /// Whether an index for `T` has been published.
    pub fn is_cached() -> bool {
        registry().contains_key(&TypeId::of::<T>())
    }

    fn downcast(any: Arc<dyn Any + Send + Sync>) -> Arc<Self> {
        any.downcast::<Self>()
            .expect("index registry is keyed by TypeId")
    }
}

impl<T> DependencyIndex<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Properties that re-announce when `source` changes, in declaration order.
    pub fn echoes(&self, source: &str) -> impl Iterator<Item = &str> {
        self.echoes
            .get(source)
            .into_iter()
            .flat_map(|targets| targets.iter().map(String::as_str))
    }

    /// Handler edges attached to `source`, in declaration order.
    pub fn handlers(&self, source: &str) -> &[HandlerEdge<T>] {
        self.handlers
            .get(source)
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    /// Whether anything depends on `source`.
    pub fn has_dependents(&self, source: &str) -> bool {
        self.echoes.contains_key(source) || self.handlers.contains_key(source)
    }

    /// Every source name with at least one dependent.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        let mut sources: IndexSet<&str> = self.echoes.keys().map(String::as_str).collect();
        sources.extend(self.handlers.keys().map(String::as_str));
        sources.into_iter()
    }

    pub fn is_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Read a declared derived property.
    pub fn read(&self, instance: &T, name: &str) -> Option<Value> {
        self.properties.get(name).map(|getter| getter(instance))
    }
}

impl<T> fmt::Debug for DependencyIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyIndex")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("echoes", &self.echoes)
            .field(
                "handlers",
                &self
                    .handlers
                    .iter()
                    .map(|(source, edges)| {
                        (source, edges.iter().map(|e| &*e.name).collect::<Vec<_>>())
                    })
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
