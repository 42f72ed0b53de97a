//! Connection options and their merged, fully-defaulted form.
//!
//! Callers hand a [`ConnectionOptions`] to a connection. Every field is
//! optional; [`merge_config`] fills the gaps from the `DEFAULT_*` constants
//! and yields an immutable [`ConnectionConfig`].

use crate::db::retry::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_INTERVAL_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_INTERVAL_MS, RetryPolicy,
};
use crate::error::Result;
use crate::models::{SchemaDefinition, SchemaRegistry};
use crate::process::ProcessHooks;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

// Driver defaults
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_AUTO_RECONNECT: bool = true;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 300;

pub const DEFAULT_EXIT_ON_ERROR: bool = false;
pub const DEFAULT_EXIT_ON_TERMINATE: bool = false;

/// Retry options as supplied by the caller.
///
/// Unknown keys are kept in `extra` and carried into the merged config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total connection attempts (default: 2)
    #[serde(alias = "reconnectTries", alias = "maxAttempts")]
    pub max_attempts: Option<u32>,
    /// Multiplier applied to the delay after every failure (default: 2)
    #[serde(alias = "reconnectFactor", alias = "factor", alias = "backoffFactor")]
    pub backoff_factor: Option<f64>,
    /// First backoff delay in milliseconds (default: 3000)
    #[serde(alias = "reconnectInterval", alias = "initialIntervalMs")]
    pub initial_interval_ms: Option<u64>,
    /// Upper bound for any backoff delay in milliseconds (default: 6000)
    #[serde(
        alias = "reconnectMaxInterval",
        alias = "maxInterval",
        alias = "maxIntervalMs"
    )]
    pub max_interval_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RetryOptions {
    pub fn max_attempts_or_default(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn backoff_factor_or_default(&self) -> f64 {
        self.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR)
    }

    pub fn initial_interval_or_default(&self) -> u64 {
        self.initial_interval_ms.unwrap_or(DEFAULT_INITIAL_INTERVAL_MS)
    }

    pub fn max_interval_or_default(&self) -> u64 {
        self.max_interval_ms.unwrap_or(DEFAULT_MAX_INTERVAL_MS)
    }

    /// Resolve into a complete policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts_or_default(),
            backoff_factor: self.backoff_factor_or_default(),
            initial_interval_ms: self.initial_interval_or_default(),
            max_interval_ms: self.max_interval_or_default(),
        }
    }
}

/// Driver options as supplied by the caller.
///
/// Keys this crate does not know about are kept in `extra` and handed to the
/// driver untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOverrides {
    #[serde(alias = "poolSize")]
    pub pool_size: Option<u32>,
    #[serde(alias = "autoReconnect")]
    pub auto_reconnect: Option<bool>,
    #[serde(alias = "connectTimeoutMS", alias = "connectTimeoutMs")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(alias = "keepAlive", alias = "keepAliveMs")]
    pub keep_alive_ms: Option<u64>,
    /// Driver level reconnects (default: the retry policy's `max_attempts`)
    #[serde(alias = "reconnectTries")]
    pub reconnect_tries: Option<u32>,
    /// Driver level reconnect interval (default: the retry policy's `initial_interval_ms`)
    #[serde(alias = "reconnectInterval")]
    pub reconnect_interval_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fully resolved options passed to [`Driver::connect`](crate::driver::Driver::connect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverOptions {
    pub pool_size: u32,
    pub auto_reconnect: bool,
    pub connect_timeout_ms: u64,
    pub keep_alive_ms: u64,
    pub reconnect_tries: u32,
    pub reconnect_interval_ms: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriverOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        merge_driver(&DriverOverrides::default(), &RetryPolicy::default())
    }
}

/// Which tokio runtime background work (the signal watcher) is spawned on.
#[derive(Debug, Clone, Default)]
pub enum RuntimeSelection {
    /// The runtime the connection is driven from.
    #[default]
    Ambient,
    /// An explicitly supplied runtime.
    Handle(Handle),
}

impl RuntimeSelection {
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self {
            Self::Ambient => tokio::spawn(future),
            Self::Handle(handle) => handle.spawn(future),
        }
    }

    pub fn is_ambient(&self) -> bool {
        matches!(self, Self::Ambient)
    }
}

/// Options accepted when creating a connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    #[serde(alias = "reconnect")]
    pub retry: RetryOptions,
    #[serde(alias = "mongoose")]
    pub driver: DriverOverrides,
    #[serde(alias = "exitOnError")]
    pub exit_on_error: Option<bool>,
    #[serde(alias = "exitOnTerminate")]
    pub exit_on_terminate: Option<bool>,
    /// Runtime for background tasks. Defaults to the ambient runtime.
    #[serde(skip)]
    pub runtime: Option<Handle>,
    /// Schemas bound into every database handle.
    #[serde(skip)]
    pub schemas: SchemaRegistry,
    /// Process exit and signal hooks. Defaults to the real process.
    #[serde(skip)]
    pub hooks: Option<ProcessHooks>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load options from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded connection options");
        Self::from_json_str(&content)
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_driver(mut self, driver: DriverOverrides) -> Self {
        self.driver = driver;
        self
    }

    pub fn exit_on_error(mut self, enabled: bool) -> Self {
        self.exit_on_error = Some(enabled);
        self
    }

    pub fn exit_on_terminate(mut self, enabled: bool) -> Self {
        self.exit_on_terminate = Some(enabled);
        self
    }

    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn with_hooks(mut self, hooks: ProcessHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Register a schema under `name`.
    pub fn schema(mut self, name: impl Into<String>, definition: &SchemaDefinition) -> Self {
        self.schemas.register(name, definition);
        self
    }

    pub fn exit_on_error_or_default(&self) -> bool {
        self.exit_on_error.unwrap_or(DEFAULT_EXIT_ON_ERROR)
    }

    pub fn exit_on_terminate_or_default(&self) -> bool {
        self.exit_on_terminate.unwrap_or(DEFAULT_EXIT_ON_TERMINATE)
    }
}

/// Merged, immutable connection configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionConfig {
    pub retry: RetryPolicy,
    /// Retry keys this crate does not interpret.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub retry_extra: Map<String, Value>,
    pub driver: DriverOptions,
    pub exit_on_error: bool,
    pub exit_on_terminate: bool,
    #[serde(skip)]
    pub runtime: RuntimeSelection,
    #[serde(skip)]
    pub hooks: ProcessHooks,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        merge_config(&ConnectionOptions::default())
    }
}

/// Merge caller options with the defaults.
///
/// Never fails. Each retry and driver field is defaulted on its own, so
/// supplying one field keeps its siblings' defaults. Unknown keys are kept.
pub fn merge_config(options: &ConnectionOptions) -> ConnectionConfig {
    for key in options.extra.keys() {
        debug!(key = %key, "Keeping unrecognised connection option");
    }

    for key in options.retry.extra.keys() {
        debug!(key = %key, "Keeping unrecognised retry option");
    }

    let retry = options.retry.to_policy();
    let driver = merge_driver(&options.driver, &retry);

    ConnectionConfig {
        retry,
        retry_extra: options.retry.extra.clone(),
        driver,
        exit_on_error: options.exit_on_error_or_default(),
        exit_on_terminate: options.exit_on_terminate_or_default(),
        runtime: options
            .runtime
            .clone()
            .map(RuntimeSelection::Handle)
            .unwrap_or_default(),
        hooks: options.hooks.clone().unwrap_or_default(),
        extra: options.extra.clone(),
    }
}

fn merge_driver(overrides: &DriverOverrides, retry: &RetryPolicy) -> DriverOptions {
    for key in overrides.extra.keys() {
        debug!(key = %key, "Passing unrecognised option through to the driver");
    }

    DriverOptions {
        pool_size: overrides.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
        auto_reconnect: overrides.auto_reconnect.unwrap_or(DEFAULT_AUTO_RECONNECT),
        connect_timeout_ms: overrides
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        keep_alive_ms: overrides.keep_alive_ms.unwrap_or(DEFAULT_KEEP_ALIVE_MS),
        reconnect_tries: overrides.reconnect_tries.unwrap_or(retry.max_attempts),
        reconnect_interval_ms: overrides
            .reconnect_interval_ms
            .unwrap_or(retry.initial_interval_ms),
        extra: overrides.extra.clone(),
    }
}
