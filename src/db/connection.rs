//! One logical link to a document-store cluster.
//!
//! A [`Connection`] owns its driver, a cache of per-database handles and the
//! schemas bound into them. `connect()` retries with exponential backoff and
//! reports progress through [`ConnectionEvent`]s.
//!
//! # Locking
//!
//! All locks are synchronous and never held across an await point. Driver
//! calls and event emission happen outside of every lock.

use super::database::{DatabaseHandle, DbKey};
use super::events::{ConnectionEvent, EventBus};
use super::retry::retry_with_backoff;
use crate::config::{ConnectionConfig, ConnectionOptions, merge_config};
use crate::driver::{Driver, DriverEvent, DriverEventKind, ListenerId, ModelOf};
use crate::error::{ConnectionError, DriverError, Result};
use crate::models::{ConnectionState, SchemaDefinition, SchemaRegistry, UriInfo, mask_uri};
use crate::process::{EXIT_CODE_ERROR, EXIT_CODE_TERMINATED, TerminationSignal};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Summary returned by a successful [`Connection::connect`].
#[derive(Debug, Clone)]
pub struct Connected<V> {
    pub uri: UriInfo,
    /// The database named in the URI.
    pub database: V,
    /// Attempts used, the successful one included.
    pub attempts: u32,
}

/// Result of [`Connection::add_schema`].
#[must_use]
#[derive(Debug, Clone)]
pub enum SchemaBinding<M> {
    /// Bound on the default database right away.
    Bound(M),
    /// Not connected yet; the schema is bound by later `get_db` calls.
    Deferred,
}

impl<M> SchemaBinding<M> {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    pub fn model(&self) -> Option<&M> {
        match self {
            Self::Bound(model) => Some(model),
            Self::Deferred => None,
        }
    }

    pub fn into_model(self) -> Option<M> {
        match self {
            Self::Bound(model) => Some(model),
            Self::Deferred => None,
        }
    }
}

type HandleMap<V> = HashMap<DbKey, Arc<DatabaseHandle<V>>>;

pub struct Connection<D: Driver> {
    uri: String,
    driver: D,
    config: Arc<ConnectionConfig>,
    state: RwLock<ConnectionState>,
    schemas: RwLock<SchemaRegistry>,
    databases: RwLock<HandleMap<D::Database>>,
    events: EventBus,
    /// Listener ids re-emitting driver events, one per kind.
    forwarding: Mutex<Vec<ListenerId>>,
    error_listener: Mutex<Option<ListenerId>>,
    signal_watcher: Mutex<Option<JoinHandle<()>>>,
    /// Set once the process is on its way out.
    terminating: Arc<AtomicBool>,
}

impl<D: Driver> Connection<D> {
    /// Create an idle connection.
    ///
    /// Driver events are forwarded from this point on, even before `connect`.
    pub fn new(uri: impl Into<String>, driver: D, mut options: ConnectionOptions) -> Arc<Self> {
        let schemas = std::mem::take(&mut options.schemas);
        let config = Arc::new(merge_config(&options));

        let connection = Arc::new(Self {
            uri: uri.into(),
            driver,
            config,
            state: RwLock::new(ConnectionState::Idle),
            schemas: RwLock::new(schemas),
            databases: RwLock::new(HashMap::new()),
            events: EventBus::new(),
            forwarding: Mutex::new(Vec::new()),
            error_listener: Mutex::new(None),
            signal_watcher: Mutex::new(None),
            terminating: Arc::new(AtomicBool::new(false)),
        });
        connection.attach_forwarding();

        debug!(uri = %connection.masked_uri(), "Created connection");
        connection
    }

    /// Connect, retrying with backoff until the policy is exhausted.
    pub async fn connect(self: &Arc<Self>) -> Result<Connected<D::Database>> {
        let info = UriInfo::parse(&self.uri)?;
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.can_connect() {
                return Err(ConnectionError::invalid_state(
                    "idle, failed or disconnected",
                    *state,
                ));
            }
            state.transition(ConnectionState::Connecting)?;
        }
        // Exit handlers from an earlier session may have fired without exiting
        self.terminating.store(false, Ordering::SeqCst);

        self.attach_forwarding();
        self.events.emit(ConnectionEvent::Connecting {
            uri: Arc::new(info.clone()),
            config: Arc::clone(&self.config),
        });

        let masked = self.masked_uri();
        let policy = self.config.retry;
        info!(
            uri = %masked,
            max_attempts = policy.attempts(),
            "Connecting to cluster"
        );

        let driver = &self.driver;
        let uri = self.uri.as_str();
        let options = &self.config.driver;
        let events = &self.events;
        let outcome = retry_with_backoff(
            &policy,
            move |attempt| {
                debug!(attempt, "Connection attempt");
                driver.connect(uri, options)
            },
            |attempt, err| {
                warn!(uri = %masked, attempt, error = %err, "Connection attempt failed");
                events.emit(ConnectionEvent::Reconnecting {
                    attempt,
                    error: Arc::clone(err),
                });
            },
        )
        .await;

        match outcome {
            Ok(((), attempts)) => {
                if let Err(e) = self.set_state(ConnectionState::Connected) {
                    warn!(
                        uri = %masked,
                        state = %self.state(),
                        "Disconnected while connecting, closing driver"
                    );
                    self.detach_forwarding();
                    if let Err(close_err) = self.driver.close().await {
                        warn!(uri = %masked, error = %close_err, "Driver close failed");
                    }
                    return Err(e);
                }
                if self.config.exit_on_error {
                    self.install_error_handler();
                }
                if self.config.exit_on_terminate {
                    self.spawn_signal_watcher();
                }
                info!(uri = %masked, attempts, "Connected to cluster");
                Ok(Connected {
                    uri: info,
                    database: self.driver.default_database(),
                    attempts,
                })
            }
            Err(exhausted) => {
                if let Err(e) = self.set_state(ConnectionState::Failed) {
                    debug!(error = %e, "Connection state changed during connect");
                }
                error!(
                    uri = %masked,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Giving up on cluster connection"
                );
                Err(ConnectionError::exhausted(
                    exhausted.attempts,
                    exhausted.last_error,
                ))
            }
        }
    }

    /// Get the handle for a database, creating and caching it on first use.
    ///
    /// `None` or `""` select the database named in the URI. New handles get
    /// every registered schema bound as a model.
    pub fn get_db(&self, name: Option<&str>) -> Arc<DatabaseHandle<D::Database>> {
        let key = DbKey::from_option(name);
        if let Some(handle) = self.cached_db(&key) {
            return handle;
        }

        let state = self.state();
        if !state.is_connected() {
            warn!(
                database = %key,
                state = %state,
                "Database handle requested before the connection is established"
            );
        }

        let view = match &key {
            DbKey::Default => self.driver.default_database(),
            DbKey::Named(name) => self.driver.use_db(name),
        };
        let handle = Arc::new(DatabaseHandle::new(key.clone(), view));
        {
            let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
            for (model, schema) in schemas.iter() {
                handle.bind_model(model, schema);
            }
        }

        debug!(
            database = %key,
            name = handle.name(),
            models = handle.model_count(),
            "Created database handle"
        );
        self.databases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&handle));
        handle
    }

    /// Evict a cached handle. Returns whether one was cached.
    pub fn clear_db(&self, name: Option<&str>) -> bool {
        let key = DbKey::from_option(name);
        let removed = self
            .databases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some();
        debug!(database = %key, removed, "Cleared database handle");
        removed
    }

    /// Register a schema, binding it right away when connected.
    pub fn add_schema(
        &self,
        name: &str,
        definition: &SchemaDefinition,
    ) -> SchemaBinding<ModelOf<D>> {
        let schema = self
            .schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, definition);

        if !self.state().is_connected() {
            debug!(model = name, "Not connected, deferring model binding");
            return SchemaBinding::Deferred;
        }

        let model = match self.cached_db(&DbKey::Default) {
            Some(handle) => handle.bind_model(name, &schema),
            None => {
                let handle = self.get_db(None);
                handle
                    .model(name)
                    .unwrap_or_else(|| handle.bind_model(name, &schema))
            }
        };
        SchemaBinding::Bound(model)
    }

    /// Close the driver and tear down listeners and the signal watcher.
    ///
    /// Cached database handles are kept.
    pub async fn disconnect(&self) -> Result<()> {
        self.shutdown(true).await
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// URI with any password replaced.
    pub fn masked_uri(&self) -> String {
        mask_uri(&self.uri)
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Receive events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
    }

    /// Keys of cached handles, default first then by name.
    pub fn cached_keys(&self) -> Vec<DbKey> {
        let mut keys: Vec<DbKey> = self
            .databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort_by(|a, b| (!a.is_default(), a.as_str()).cmp(&(!b.is_default(), b.as_str())));
        keys
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    fn cached_db(&self, key: &DbKey) -> Option<Arc<DatabaseHandle<D::Database>>> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_state(&self, next: ConnectionState) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        state.transition(next)?;
        debug!(from = %previous, to = %next, "Connection state changed");
        Ok(())
    }

    fn attach_forwarding(&self) {
        let mut forwarding = lock(&self.forwarding);
        if !forwarding.is_empty() {
            return;
        }

        for kind in DriverEventKind::ALL {
            let events = self.events.clone();
            let id = self.driver.on(
                kind,
                Arc::new(move |event: &DriverEvent| {
                    events.emit(ConnectionEvent::Driver(event.clone()));
                }),
            );
            forwarding.push(id);
        }
    }

    fn detach_forwarding(&self) {
        let ids: Vec<ListenerId> = lock(&self.forwarding).drain(..).collect();
        for id in ids {
            self.driver.off(id);
        }
    }

    fn install_error_handler(&self) {
        let mut slot = lock(&self.error_listener);
        if slot.is_some() {
            return;
        }

        let events = self.events.clone();
        let terminating = Arc::clone(&self.terminating);
        let terminator = Arc::clone(&self.config.hooks.terminator);
        let masked = self.masked_uri();
        let id = self.driver.on(
            DriverEventKind::Error,
            Arc::new(move |event: &DriverEvent| {
                if terminating.swap(true, Ordering::SeqCst) {
                    return;
                }
                error!(
                    uri = %masked,
                    error = event.error.as_deref().map(DriverError::message),
                    "Driver error, exiting process"
                );
                events.emit(ConnectionEvent::ErrorQuit {
                    error: event.error.clone(),
                });
                terminator.terminate(EXIT_CODE_ERROR);
            }),
        );
        *slot = Some(id);
    }

    fn remove_error_handler(&self) {
        if let Some(id) = lock(&self.error_listener).take() {
            self.driver.off(id);
        }
    }

    fn spawn_signal_watcher(self: &Arc<Self>) {
        let mut slot = lock(&self.signal_watcher);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let signals = Arc::clone(&self.config.hooks.signals);
        *slot = Some(self.config.runtime.spawn(async move {
            let Some(signal) = signals.next_signal().await else {
                debug!("Signal source closed");
                return;
            };
            Self::on_signal(weak, signal).await;
        }));
    }

    async fn on_signal(weak: Weak<Self>, signal: TerminationSignal) {
        let Some(connection) = weak.upgrade() else {
            return;
        };
        if connection.terminating.swap(true, Ordering::SeqCst) {
            debug!(signal = %signal, "Already terminating");
            return;
        }

        info!(
            uri = %connection.masked_uri(),
            signal = %signal,
            "Termination signal received, closing connection"
        );
        let terminator = Arc::clone(&connection.config.hooks.terminator);
        match connection.shutdown(false).await {
            Ok(()) => {
                connection.events.emit(ConnectionEvent::CloseQuit { signal });
                terminator.terminate(EXIT_CODE_TERMINATED);
            }
            Err(e) => {
                error!(error = %e, "Failed to close connection after termination signal");
                terminator.terminate(EXIT_CODE_ERROR);
            }
        }
    }

    /// `abort_watcher` is false when called from the watcher itself.
    async fn shutdown(&self, abort_watcher: bool) -> Result<()> {
        let masked = self.masked_uri();
        info!(uri = %masked, "Disconnecting from cluster");

        self.remove_error_handler();
        let watcher = lock(&self.signal_watcher).take();
        if let Some(handle) = watcher {
            if abort_watcher {
                handle.abort();
            }
        }

        let result = self.driver.close().await;
        self.detach_forwarding();
        self.force_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                info!(uri = %masked, "Disconnected from cluster");
                Ok(())
            }
            Err(e) => {
                warn!(uri = %masked, error = %e, "Driver close failed");
                Err(ConnectionError::disconnect(e))
            }
        }
    }

    fn force_state(&self, next: ConnectionState) {
        if let Err(e) = self.set_state(next) {
            debug!(error = %e, "Ignoring state change");
        }
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.signal_watcher).take() {
            handle.abort();
        }
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.masked_uri())
            .field("state", &format_args!("{}", self.state()))
            .field("databases", &self.cached_keys())
            .field("schemas", &self.schema_names())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
