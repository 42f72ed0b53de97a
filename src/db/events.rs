//! Events published by a [`Connection`](super::Connection).

use crate::config::ConnectionConfig;
use crate::driver::DriverEvent;
use crate::error::DriverError;
use crate::models::UriInfo;
use crate::process::TerminationSignal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A `connect()` call is about to make its first attempt.
    Connecting {
        uri: Arc<UriInfo>,
        config: Arc<ConnectionConfig>,
    },
    /// Attempt `attempt` failed.
    Reconnecting {
        attempt: u32,
        error: Arc<DriverError>,
    },
    /// A driver event, re-emitted unchanged.
    Driver(DriverEvent),
    /// A driver error is about to end the process.
    ErrorQuit { error: Option<Arc<DriverError>> },
    /// The connection closed after a termination signal.
    CloseQuit { signal: TerminationSignal },
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Driver(event) => event.name(),
            Self::ErrorQuit { .. } => "error-quit",
            Self::CloseQuit { .. } => "close-quit",
        }
    }
}

/// Fan-out of connection events to any number of subscribers.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        trace!(event = event.name(), "Publishing connection event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverEventKind;

    #[test]
    fn test_event_names() {
        let reconnecting = ConnectionEvent::Reconnecting {
            attempt: 1,
            error: Arc::new(DriverError::new("refused")),
        };
        assert_eq!(reconnecting.name(), "reconnecting");
        assert_eq!(
            ConnectionEvent::Driver(DriverEvent::new(DriverEventKind::FullSetup)).name(),
            "fullsetup"
        );
        assert_eq!(
            ConnectionEvent::CloseQuit {
                signal: TerminationSignal::Terminate
            }
            .name(),
            "close-quit"
        );
    }

    #[tokio::test]
    async fn test_bus_without_subscribers_drops_events() {
        let bus = EventBus::new();
        bus.emit(ConnectionEvent::ErrorQuit { error: None });

        let mut rx = bus.subscribe();
        bus.emit(ConnectionEvent::ErrorQuit { error: None });
        assert_eq!(rx.recv().await.unwrap().name(), "error-quit");
        assert!(rx.try_recv().is_err());
    }
}
