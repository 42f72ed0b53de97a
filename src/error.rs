//! Error types for docstore connections.
//!
//! This module defines all error types using `thiserror`. Transient driver
//! failures never surface here directly: they are retried by the connection and
//! only reported through events. What reaches the caller is either an exhausted
//! retry budget, a misuse of the lifecycle, or a failure to close.

use std::sync::Arc;
use thiserror::Error;

/// Error reported by a driver implementation.
///
/// Drivers are external collaborators, so this type only carries a message
/// and an optional underlying cause.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    /// Create a driver error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a driver error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The driver supplied message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        /// Last error returned by the driver.
        source: Arc<DriverError>,
    },

    #[error("Invalid connection URI: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Invalid connection state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Disconnect failed: {source}")]
    Disconnect {
        #[source]
        source: DriverError,
    },

    #[error("Configuration error: {message}")]
    Config { message: String, suggestion: String },
}

impl ConnectionError {
    /// Create a retry-exhausted error carrying the last driver error.
    pub fn exhausted(attempts: u32, source: Arc<DriverError>) -> Self {
        Self::Exhausted { attempts, source }
    }

    /// Create an invalid URI error.
    ///
    /// The stored URI is masked so that credentials never end up in logs.
    pub fn invalid_uri(uri: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: crate::models::mask_uri(uri),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Create a disconnect error.
    pub fn disconnect(source: DriverError) -> Self {
        Self::Disconnect { source }
    }

    /// Create a configuration error with a helpful suggestion.
    pub fn config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Config { suggestion, .. } => Some(suggestion),
            Self::Exhausted { .. } => {
                Some("Check that the cluster is reachable or raise retry.max_attempts")
            }
            Self::InvalidUri { .. } => {
                Some("Use the format mongodb://[user:pass@]host[:port][,host...]/[database][?options]")
            }
            _ => None,
        }
    }

    /// Check if calling the operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Disconnect { .. })
    }

    /// The last driver error, for exhausted connects.
    pub fn last_driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            Self::Disconnect { source } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::config(
            format!("I/O error: {}", err),
            "Check that the configuration file exists and is readable",
        )
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        ConnectionError::config(
            format!("Invalid configuration JSON: {}", err),
            "Check the configuration syntax near the reported line and column",
        )
    }
}

/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
