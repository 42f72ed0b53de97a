//! Process-level hooks: termination signals and process exit.
//!
//! Connections never call `std::process::exit` or install signal handlers
//! directly. They go through [`ProcessHooks`], which defaults to the real
//! process and can be swapped for in-memory versions when embedding.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

/// Exit status used after a fatal driver error.
pub const EXIT_CODE_ERROR: i32 = 1;
/// Exit status used after a graceful shutdown on a termination signal.
pub const EXIT_CODE_TERMINATED: i32 = 0;

/// A termination signal delivered to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl TerminationSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ends the process with a status code.
pub trait Terminator: Send + Sync + 'static {
    fn terminate(&self, code: i32);
}

/// Exits the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, code: i32) {
        info!(code, "Exiting process");
        std::process::exit(code);
    }
}

/// Source of termination signals.
pub trait SignalSource: Send + Sync + 'static {
    /// Resolve with the next signal, or `None` once the source is closed.
    fn next_signal(&self) -> BoxFuture<'static, Option<TerminationSignal>>;
}

/// SIGINT and SIGTERM from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

impl SignalSource for OsSignals {
    fn next_signal(&self) -> BoxFuture<'static, Option<TerminationSignal>> {
        Box::pin(wait_for_signal())
    }
}

async fn wait_for_signal() -> Option<TerminationSignal> {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => Some(TerminationSignal::Interrupt),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGINT handler");
                std::future::pending::<Option<TerminationSignal>>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => stream.recv().await.map(|()| TerminationSignal::Terminate),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<Option<TerminationSignal>>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<TerminationSignal>>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

/// Signals fed through a channel.
///
/// Dropping every sender closes the source.
#[derive(Debug, Clone)]
pub struct ChannelSignals {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<TerminationSignal>>>,
}

impl ChannelSignals {
    pub fn new() -> (Self, mpsc::UnboundedSender<TerminationSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Arc::new(Mutex::new(rx)),
            },
            tx,
        )
    }
}

impl SignalSource for ChannelSignals {
    fn next_signal(&self) -> BoxFuture<'static, Option<TerminationSignal>> {
        let receiver = Arc::clone(&self.receiver);
        Box::pin(async move { receiver.lock().await.recv().await })
    }
}

/// Hooks a connection uses to react to the process environment.
#[derive(Clone)]
pub struct ProcessHooks {
    pub terminator: Arc<dyn Terminator>,
    pub signals: Arc<dyn SignalSource>,
}

impl ProcessHooks {
    pub fn new(terminator: Arc<dyn Terminator>, signals: Arc<dyn SignalSource>) -> Self {
        Self {
            terminator,
            signals,
        }
    }
}

impl Default for ProcessHooks {
    fn default() -> Self {
        Self::new(Arc::new(ProcessTerminator), Arc::new(OsSignals))
    }
}

impl std::fmt::Debug for ProcessHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHooks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(TerminationSignal::Interrupt.name(), "SIGINT");
        assert_eq!(TerminationSignal::Terminate.to_string(), "SIGTERM");
    }

    #[tokio::test]
    async fn test_channel_signals_delivers_in_order() {
        let (signals, tx) = ChannelSignals::new();
        tx.send(TerminationSignal::Terminate).unwrap();
        tx.send(TerminationSignal::Interrupt).unwrap();

        assert_eq!(signals.next_signal().await, Some(TerminationSignal::Terminate));
        assert_eq!(signals.next_signal().await, Some(TerminationSignal::Interrupt));
    }

    #[tokio::test]
    async fn test_channel_signals_closes_with_senders() {
        let (signals, tx) = ChannelSignals::new();
        drop(tx);
        assert_eq!(signals.next_signal().await, None);
    }

    #[test]
    fn test_hooks_debug_is_opaque() {
        let hooks = ProcessHooks::default();
        assert_eq!(format!("{hooks:?}"), "ProcessHooks { .. }");
    }
}
