//! Connection-related data models.
//!
//! This module defines the parsed URI metadata emitted with `connecting`
//! events and the connection lifecycle state.

use crate::error::{ConnectionError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Default port of a document store node.
pub const DEFAULT_PORT: u16 = 27017;

/// Supported URI schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UriScheme {
    /// `mongodb://` with an explicit seed list
    Standard,
    /// `mongodb+srv://`, seed list resolved through DNS
    Srv,
}

impl UriScheme {
    /// Get the URI prefix for this scheme.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Standard => "mongodb://",
            Self::Srv => "mongodb+srv://",
        }
    }
}

impl std::fmt::Display for UriScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "mongodb"),
            Self::Srv => write!(f, "mongodb+srv"),
        }
    }
}

/// A single seed host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parsed connection URI metadata.
///
/// Never carries the password; only whether one was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UriInfo {
    pub scheme: UriScheme,
    pub hosts: Vec<HostPort>,
    /// Default database from the URI path. None when the path is empty.
    pub database: Option<String>,
    pub username: Option<String>,
    pub has_password: bool,
    /// Query string options, last value wins.
    pub options: BTreeMap<String, String>,
}

impl UriInfo {
    /// Parse a connection URI.
    ///
    /// # Format
    ///
    /// ```text
    /// mongodb://[user[:password]@]host[:port][,host[:port]...][/[database]][?options]
    /// mongodb+srv://[user[:password]@]host[/[database]][?options]
    /// ```
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = uri.strip_prefix(UriScheme::Srv.prefix()) {
            (UriScheme::Srv, rest)
        } else if let Some(rest) = uri.strip_prefix(UriScheme::Standard.prefix()) {
            (UriScheme::Standard, rest)
        } else {
            return Err(ConnectionError::invalid_uri(
                uri,
                "URI must start with mongodb:// or mongodb+srv://",
            ));
        };

        // Split off query string before looking at the path
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };

        // Credentials end at the last '@' of the authority
        let authority_end = rest.find('/').unwrap_or(rest.len());
        let (auth, rest) = match rest[..authority_end].rfind('@') {
            Some(pos) => (Some(&rest[..pos]), &rest[pos + 1..]),
            None => (None, rest),
        };

        let (host_list, database) = match rest.split_once('/') {
            Some((hosts, db)) => (hosts, Some(db)),
            None => (rest, None),
        };

        let database = database.filter(|db| !db.is_empty()).map(String::from);
        if let Some(db) = &database {
            if db.contains(['/', '\\', ' ', '"', '$']) {
                return Err(ConnectionError::invalid_uri(
                    uri,
                    format!("invalid database name '{}'", db),
                ));
            }
        }

        let (username, has_password) = match auth {
            Some(auth) => match auth.split_once(':') {
                Some((user, _)) => (Some(user.to_string()), true),
                None => (Some(auth.to_string()), false),
            },
            None => (None, false),
        };
        if username.as_deref() == Some("") {
            return Err(ConnectionError::invalid_uri(uri, "empty username"));
        }

        let hosts = Self::parse_hosts(uri, host_list)?;
        if scheme == UriScheme::Srv && (hosts.len() != 1 || host_list.contains(':')) {
            return Err(ConnectionError::invalid_uri(
                uri,
                "mongodb+srv URIs take exactly one host and no port",
            ));
        }

        let options = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            scheme,
            hosts,
            database,
            username,
            has_password,
            options,
        })
    }

    fn parse_hosts(uri: &str, host_list: &str) -> Result<Vec<HostPort>> {
        if host_list.is_empty() {
            return Err(ConnectionError::invalid_uri(uri, "missing host"));
        }

        host_list
            .split(',')
            .map(|entry| {
                if entry.is_empty() {
                    return Err(ConnectionError::invalid_uri(uri, "empty host in seed list"));
                }
                // IPv6 literals are bracketed: [::1]:27017
                let (host, port) = if let Some(stripped) = entry.strip_prefix('[') {
                    match stripped.split_once(']') {
                        Some((host, tail)) => (host, tail.strip_prefix(':')),
                        None => {
                            return Err(ConnectionError::invalid_uri(
                                uri,
                                "unterminated IPv6 literal",
                            ));
                        }
                    }
                } else {
                    match entry.rsplit_once(':') {
                        Some((host, port)) => (host, Some(port)),
                        None => (entry, None),
                    }
                };

                let port = match port {
                    Some(p) => p.parse::<u16>().map_err(|_| {
                        ConnectionError::invalid_uri(uri, format!("invalid port '{}'", p))
                    })?,
                    None => DEFAULT_PORT,
                };

                Ok(HostPort {
                    host: host.to_string(),
                    port,
                })
            })
            .collect()
    }

    /// The `replicaSet` option, if present.
    pub fn replica_set(&self) -> Option<&str> {
        self.options.get("replicaSet").map(String::as_str)
    }
}

/// Mask the password portion of a connection URI for display.
pub fn mask_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://").map(|p| p + 3) else {
        return uri.to_string();
    };
    let authority_end = uri[scheme_end..]
        .find(['/', '?'])
        .map_or(uri.len(), |p| scheme_end + p);
    let authority = &uri[scheme_end..authority_end];

    let Some(at_pos) = authority.rfind('@') else {
        return uri.to_string();
    };
    match authority[..at_pos].find(':') {
        Some(colon) => format!(
            "{}****{}",
            &uri[..scheme_end + colon + 1],
            &uri[scheme_end + at_pos..]
        ),
        None => uri.to_string(),
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, never connected
    Idle,
    /// Retry loop in progress
    Connecting,
    Connected,
    /// Retry budget exhausted
    Failed,
    /// Closed through `disconnect()`
    Disconnected,
}

impl ConnectionState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Failed, Connecting)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (_, Disconnected)
        )
    }

    /// Transition to new state.
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(ConnectionError::invalid_state(
                format!("valid transition from {} to {}", self, next),
                *self,
            ));
        }
        *self = next;
        Ok(())
    }

    /// Check if a new `connect()` may start from this state.
    pub fn can_connect(&self) -> bool {
        self.can_transition_to(ConnectionState::Connecting)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
