//! Driver abstraction.
//!
//! A [`Driver`] owns the low-level link to the cluster. Connections only talk
//! to it through this trait, so the wire protocol stays out of this crate.

mod events;
pub mod memory;

pub use events::{DriverEvent, DriverEventKind, EventListener, ListenerId, ListenerTable};
pub use memory::{MemoryDatabase, MemoryDriver, MemoryModel};

use crate::config::DriverOptions;
use crate::error::DriverError;
use crate::models::Schema;
use std::future::Future;
use std::sync::Arc;

/// A logical database reachable through a driver.
pub trait DatabaseView: Clone + Send + Sync + 'static {
    /// Model type produced when a schema is bound to this database.
    type Model: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Compile `schema` into a model named `name` on this database.
    fn model(&self, name: &str, schema: &Arc<Schema>) -> Self::Model;
}

/// Low-level driver for one cluster link.
pub trait Driver: Send + Sync + 'static {
    type Database: DatabaseView;

    /// Make one connection attempt.
    fn connect(
        &self,
        uri: &str,
        options: &DriverOptions,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// The database named in the URI, or the driver's fallback.
    ///
    /// Available before `connect` completes; operations on it are then queued
    /// or fail at the driver's discretion.
    fn default_database(&self) -> Self::Database;

    /// Another database sharing this driver's sockets.
    fn use_db(&self, name: &str) -> Self::Database;

    fn close(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn on(&self, kind: DriverEventKind, listener: EventListener) -> ListenerId;

    /// Remove a listener. Returns whether it was registered.
    fn off(&self, id: ListenerId) -> bool;
}

/// Model type of a driver's databases.
pub type ModelOf<D> = <<D as Driver>::Database as DatabaseView>::Model;
