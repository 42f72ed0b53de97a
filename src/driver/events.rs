//! Driver lifecycle events and listener bookkeeping.

use crate::error::DriverError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Every lifecycle event a driver may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverEventKind {
    Connecting,
    Connected,
    Open,
    Disconnecting,
    Disconnected,
    Close,
    Reconnected,
    Error,
    FullSetup,
    All,
    ReconnectFailed,
}

impl DriverEventKind {
    pub const ALL: [DriverEventKind; 11] = [
        Self::Connecting,
        Self::Connected,
        Self::Open,
        Self::Disconnecting,
        Self::Disconnected,
        Self::Close,
        Self::Reconnected,
        Self::Error,
        Self::FullSetup,
        Self::All,
        Self::ReconnectFailed,
    ];

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Open => "open",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Close => "close",
            Self::Reconnected => "reconnected",
            Self::Error => "error",
            Self::FullSetup => "fullsetup",
            Self::All => "all",
            Self::ReconnectFailed => "reconnectFailed",
        }
    }
}

impl std::fmt::Display for DriverEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct DriverEvent {
    pub kind: DriverEventKind,
    /// Set for `error` events.
    pub error: Option<Arc<DriverError>>,
}

impl DriverEvent {
    pub fn new(kind: DriverEventKind) -> Self {
        Self { kind, error: None }
    }

    pub fn error(error: DriverError) -> Self {
        Self {
            kind: DriverEventKind::Error,
            error: Some(Arc::new(error)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

pub type EventListener = Arc<dyn Fn(&DriverEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Entry = (ListenerId, DriverEventKind, EventListener);

/// Listener registry a driver can embed to implement `on`/`off`.
#[derive(Default)]
pub struct ListenerTable {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Entry>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: DriverEventKind, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, listener));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    /// Call every listener registered for the event's kind.
    ///
    /// Listeners run outside the lock and may register or remove listeners.
    /// Returns how many were called.
    pub fn emit(&self, event: &DriverEvent) -> usize {
        let matching: Vec<EventListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in &matching {
            listener(event);
        }
        matching.len()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, kind: DriverEventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

impl std::fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerTable")
            .field("listeners", &self.len())
            .finish()
    }
}
