//! Named connections.

use super::connection::Connection;
use crate::config::ConnectionOptions;
use crate::driver::Driver;
use crate::models::mask_uri;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Builds a fresh driver for every connection added.
pub type DriverFactory<D> = Arc<dyn Fn() -> D + Send + Sync>;

/// Registry of connections by name.
///
/// Adding never connects. Connections are never removed; adding under an
/// existing name replaces the entry without closing the old connection.
pub struct ConnectionRegistry<D: Driver> {
    factory: DriverFactory<D>,
    defaults: ConnectionOptions,
    connections: RwLock<HashMap<String, Arc<Connection<D>>>>,
}

impl<D: Driver> ConnectionRegistry<D> {
    /// `defaults` apply to every `add` that brings no options of its own.
    pub fn new(
        factory: impl Fn() -> D + Send + Sync + 'static,
        defaults: ConnectionOptions,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            defaults,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a connection and store it under `name`.
    pub fn add(
        &self,
        name: impl Into<String>,
        uri: impl Into<String>,
        options: Option<ConnectionOptions>,
    ) -> Arc<Connection<D>> {
        let name = name.into();
        let uri = uri.into();
        let options = options.unwrap_or_else(|| self.defaults.clone());

        info!(name = %name, uri = %mask_uri(&uri), "Registering connection");
        let connection = Connection::new(uri, (self.factory)(), options);

        let replaced = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::clone(&connection))
            .is_some();
        if replaced {
            debug!(name = %name, "Replaced existing connection");
        }
        connection
    }

    pub fn get(&self, name: &str) -> Option<Arc<Connection<D>>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn defaults(&self) -> &ConnectionOptions {
        &self.defaults
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryOptions;
    use crate::driver::MemoryDriver;
    use crate::models::ConnectionState;

    #[test]
    fn test_add_does_not_connect() {
        let registry = ConnectionRegistry::new(MemoryDriver::new, ConnectionOptions::default());
        let conn = registry.add("main", "mongodb://localhost/app", None);

        assert_eq!(conn.state(), ConnectionState::Idle);
        assert_eq!(conn.driver().connect_calls(), 0);
        assert_eq!(registry.names(), vec!["main"]);
    }

    #[test]
    fn test_defaults_used_without_options() {
        let defaults = ConnectionOptions::new().with_retry(RetryOptions {
            max_attempts: Some(9),
            ..RetryOptions::default()
        });
        let registry = ConnectionRegistry::new(MemoryDriver::new, defaults);

        let inherited = registry.add("a", "mongodb://localhost/a", None);
        let explicit = registry.add("b", "mongodb://localhost/b", Some(ConnectionOptions::new()));

        assert_eq!(inherited.config().retry.max_attempts, 9);
        assert_eq!(explicit.config().retry.max_attempts, 2);
    }

    #[test]
    fn test_each_connection_gets_its_own_driver() {
        let registry = ConnectionRegistry::new(MemoryDriver::new, ConnectionOptions::default());
        let a = registry.add("a", "mongodb://localhost/a", None);
        let b = registry.add("b", "mongodb://localhost/b", None);
        assert!(!std::ptr::eq(a.driver(), b.driver()));
    }

    #[test]
    fn test_add_replaces_silently() {
        let registry = ConnectionRegistry::new(MemoryDriver::new, ConnectionOptions::default());
        let first = registry.add("main", "mongodb://one/app", None);
        let second = registry.add("main", "mongodb://two/app", None);

        assert_eq!(registry.len(), 1);
        let current = registry.get("main").unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
        assert_eq!(current.uri(), "mongodb://two/app");
    }
}
