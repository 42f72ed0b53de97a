//! Connection lifecycle layer.
//!
//! This module provides:
//! - Retry with exponential backoff
//! - The per-URI connection state machine
//! - Cached per-database handles with bound models
//! - A registry of named connections

pub mod connection;
pub mod database;
pub mod events;
pub mod registry;
pub mod retry;

pub use connection::{Connected, Connection, SchemaBinding};
pub use database::{DatabaseHandle, DbKey};
pub use events::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};
pub use registry::{ConnectionRegistry, DriverFactory};
pub use retry::{RetryExhausted, RetryPolicy, retry_with_backoff};
