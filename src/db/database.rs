//! Cached per-database handles.

use crate::driver::DatabaseView;
use crate::models::Schema;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::debug;

/// Key of a cached database handle.
///
/// Distinguishes the database named in the URI from databases selected by
/// name, so a database literally called `_default` cannot collide with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DbKey {
    Default,
    Named(String),
}

impl DbKey {
    /// Display name of the default key.
    pub const DEFAULT_NAME: &'static str = "_default";

    /// `None` and the empty string both select the default database.
    pub fn from_option(name: Option<&str>) -> Self {
        match name {
            None | Some("") => Self::Default,
            Some(name) => Self::Named(name.to_string()),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => Self::DEFAULT_NAME,
            Self::Named(name) => name,
        }
    }
}

impl std::fmt::Display for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Option<&str>> for DbKey {
    fn from(name: Option<&str>) -> Self {
        Self::from_option(name)
    }
}

impl From<&str> for DbKey {
    fn from(name: &str) -> Self {
        Self::from_option(Some(name))
    }
}

/// A database view plus the models bound on it.
pub struct DatabaseHandle<V: DatabaseView> {
    key: DbKey,
    view: V,
    models: RwLock<HashMap<String, V::Model>>,
    created_at: Instant,
}

impl<V: DatabaseView> DatabaseHandle<V> {
    pub fn new(key: DbKey, view: V) -> Self {
        Self {
            key,
            view,
            models: RwLock::new(HashMap::new()),
            created_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &DbKey {
        &self.key
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Name of the underlying database.
    pub fn name(&self) -> &str {
        self.view.name()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Bind `schema` as model `name`, replacing any model of that name.
    pub fn bind_model(&self, name: &str, schema: &Arc<Schema>) -> V::Model {
        let model = self.view.model(name, schema);
        let replaced = self
            .models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), model.clone())
            .is_some();
        debug!(
            database = %self.key,
            model = name,
            replaced,
            "Bound model"
        );
        model
    }

    pub fn model(&self, name: &str) -> Option<V::Model> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Bound model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn model_count(&self) -> usize {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<V: DatabaseView + std::fmt::Debug> std::fmt::Debug for DatabaseHandle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("key", &self.key)
            .field("view", &self.view)
            .field("models", &self.model_names())
            .finish()
    }
}
