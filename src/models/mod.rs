//! Data models shared across the crate.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionState, DEFAULT_PORT, HostPort, UriInfo, UriScheme, mask_uri};
pub use schema::{
    Getter, IndexSpec, Method, Plugin, Schema, SchemaDefinition, SchemaRegistry, Static,
    VirtualField, VirtualSpec,
};
