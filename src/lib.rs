//! Docstore Connections
//!
//! Connection lifecycle management for document-store clusters:
//! - Connect with exponential backoff and report every failed attempt
//! - Keep named connections in a registry
//! - Cache one handle per logical database with schemas bound as models
//! - Optionally exit the process on driver errors or termination signals
//!
//! The wire protocol lives behind the [`driver::Driver`] trait.

pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod logging;
pub mod models;
pub mod process;

pub use config::{ConnectionConfig, ConnectionOptions, DriverOptions, merge_config};
pub use db::{
    Connected, Connection, ConnectionEvent, ConnectionRegistry, DatabaseHandle, DbKey,
    RetryPolicy, SchemaBinding,
};
pub use driver::{DatabaseView, Driver, DriverEvent, DriverEventKind};
pub use error::{ConnectionError, DriverError, Result};
pub use models::{ConnectionState, Schema, SchemaDefinition, SchemaRegistry, UriInfo};
pub use process::{ProcessHooks, TerminationSignal};
