//! In-process driver.
//!
//! Holds no sockets. Connect outcomes can be scripted, which makes it the
//! driver of choice for embedding tests and local development.

use super::{
    DatabaseView, Driver, DriverEvent, DriverEventKind, EventListener, ListenerId, ListenerTable,
};
use crate::config::DriverOptions;
use crate::error::DriverError;
use crate::models::{Schema, UriInfo};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Database used when the URI names none.
pub const FALLBACK_DATABASE: &str = "test";

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct MemoryState {
    /// Scripted outcomes for upcoming connect calls; empty means success.
    script: VecDeque<Option<String>>,
    close_failure: Option<String>,
    open: bool,
    connect_calls: u32,
    close_calls: u32,
    default_database: Option<String>,
    last_options: Option<DriverOptions>,
}

#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
    listeners: ListenerTable,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose first `attempts` connects fail.
    pub fn failing(attempts: u32) -> Self {
        let driver = Self::new();
        driver.fail_next(attempts);
        driver
    }

    /// Make the next `attempts` connect calls fail.
    pub fn fail_next(&self, attempts: u32) {
        let mut state = self.lock();
        for _ in 0..attempts {
            state.script.push_back(Some("connection refused".to_string()));
        }
    }

    /// Make the next connect call fail with `message`.
    pub fn fail_next_with(&self, message: impl Into<String>) {
        self.lock().script.push_back(Some(message.into()));
    }

    /// Make the next close call fail with `message`.
    pub fn fail_close_with(&self, message: impl Into<String>) {
        self.lock().close_failure = Some(message.into());
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.lock().close_calls
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn last_options(&self) -> Option<DriverOptions> {
        self.lock().last_options.clone()
    }

    /// Emit a lifecycle event as if it came from the cluster.
    pub fn emit(&self, event: DriverEvent) -> usize {
        trace!(event = event.name(), "Memory driver emitting event");
        self.listeners.emit(&event)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listener_count_for(&self, kind: DriverEventKind) -> usize {
        self.listeners.count_for(kind)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for MemoryDriver {
    type Database = MemoryDatabase;

    async fn connect(&self, uri: &str, options: &DriverOptions) -> Result<(), DriverError> {
        let attempt = {
            let mut state = self.lock();
            state.connect_calls += 1;
            state.last_options = Some(options.clone());
            if let Some(Some(message)) = state.script.pop_front() {
                let attempt = state.connect_calls;
                drop(state);
                debug!(attempt, "Memory driver refusing connection");
                return Err(DriverError::new(format!("{message} (attempt {attempt})")));
            }
            state.open = true;
            state.default_database = UriInfo::parse(uri).ok().and_then(|info| info.database);
            state.connect_calls
        };

        debug!(attempt, "Memory driver connected");
        self.listeners.emit(&DriverEvent::new(DriverEventKind::Connected));
        self.listeners.emit(&DriverEvent::new(DriverEventKind::Open));
        Ok(())
    }

    fn default_database(&self) -> MemoryDatabase {
        let name = self
            .lock()
            .default_database
            .clone()
            .unwrap_or_else(|| FALLBACK_DATABASE.to_string());
        MemoryDatabase::new(name)
    }

    fn use_db(&self, name: &str) -> MemoryDatabase {
        MemoryDatabase::new(name)
    }

    async fn close(&self) -> Result<(), DriverError> {
        {
            let mut state = self.lock();
            state.close_calls += 1;
            if let Some(message) = state.close_failure.take() {
                return Err(DriverError::new(message));
            }
            state.open = false;
        }

        self.listeners.emit(&DriverEvent::new(DriverEventKind::Disconnected));
        self.listeners.emit(&DriverEvent::new(DriverEventKind::Close));
        Ok(())
    }

    fn on(&self, kind: DriverEventKind, listener: EventListener) -> ListenerId {
        self.listeners.on(kind, listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDatabase {
    name: String,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DatabaseView for MemoryDatabase {
    type Model = MemoryModel;

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self, name: &str, schema: &Arc<Schema>) -> MemoryModel {
        MemoryModel {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            database: self.name.clone(),
            collection: schema.collection_for(name),
            schema: Arc::clone(schema),
        }
    }
}

/// A schema bound to a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryModel {
    id: u64,
    name: String,
    database: String,
    collection: String,
    schema: Arc<Schema>,
}

impl MemoryModel {
    /// Unique per bind; rebinding a schema yields a new id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SchemaDefinition;
    use serde_json::Map;

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let driver = MemoryDriver::failing(2);
        let options = DriverOptions::default();

        let first = driver.connect("mongodb://localhost/app", &options).await;
        assert_eq!(first.unwrap_err().message(), "connection refused (attempt 1)");
        assert!(driver.connect("mongodb://localhost/app", &options).await.is_err());
        assert!(driver.connect("mongodb://localhost/app", &options).await.is_ok());

        assert_eq!(driver.connect_calls(), 3);
        assert!(driver.is_open());
        assert_eq!(driver.default_database().name(), "app");
    }

    #[tokio::test]
    async fn test_close_failure_is_one_shot() {
        let driver = MemoryDriver::new();
        driver.fail_close_with("socket hang up");
        assert!(driver.close().await.is_err());
        assert!(driver.close().await.is_ok());
        assert_eq!(driver.close_calls(), 2);
    }

    #[test]
    fn test_default_database_before_connect() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.default_database().name(), FALLBACK_DATABASE);
        assert_eq!(driver.use_db("tenant1").name(), "tenant1");
    }

    #[test]
    fn test_model_uses_schema_collection() {
        let schema = Arc::new(
            SchemaDefinition::new(Map::new())
                .collection("people")
                .compile(),
        );
        let db = MemoryDatabase::new("app");
        let a = db.model("Users", &schema);
        let b = db.model("Users", &schema);

        assert_eq!(a.collection(), "people");
        assert_eq!(a.database(), "app");
        assert_ne!(a.id(), b.id());
    }
}
