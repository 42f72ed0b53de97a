//! Integration tests for exit-on-error and exit-on-terminate.

use docstore_connections::driver::{DriverEvent, MemoryDriver};
use docstore_connections::process::{ChannelSignals, ProcessHooks, Terminator};
use docstore_connections::{
    Connection, ConnectionEvent, ConnectionOptions, ConnectionState, DriverError,
    TerminationSignal,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_test::assert_ok;

const URI: &str = "mongodb://localhost/app";

/// Records exit codes instead of exiting.
struct RecordingTerminator {
    codes: mpsc::UnboundedSender<i32>,
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32) {
        let _ = self.codes.send(code);
    }
}

struct Harness {
    signals: mpsc::UnboundedSender<TerminationSignal>,
    codes: mpsc::UnboundedReceiver<i32>,
    hooks: ProcessHooks,
}

fn harness() -> Harness {
    let (signal_source, signals) = ChannelSignals::new();
    let (codes_tx, codes) = mpsc::unbounded_channel();
    let hooks = ProcessHooks::new(
        Arc::new(RecordingTerminator { codes: codes_tx }),
        Arc::new(signal_source),
    );
    Harness {
        signals,
        codes,
        hooks,
    }
}

fn drain(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_sigint_closes_once_and_exits_zero() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_terminate(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);
    let mut rx = conn.subscribe();

    h.signals.send(TerminationSignal::Interrupt).unwrap();
    let code = tokio::time::timeout(Duration::from_secs(5), h.codes.recv())
        .await
        .unwrap();

    assert_eq!(code, Some(0));
    assert_eq!(conn.driver().close_calls(), 1);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(conn.is_terminating());

    let close_quit: Vec<TerminationSignal> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            ConnectionEvent::CloseQuit { signal } => Some(signal),
            _ => None,
        })
        .collect();
    assert_eq!(close_quit, vec![TerminationSignal::Interrupt]);
}

#[tokio::test]
async fn test_sigterm_reports_its_own_name() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_terminate(true)
        .with_hooks(h.hooks.clone())
        .with_runtime(tokio::runtime::Handle::current());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);
    let mut rx = conn.subscribe();

    h.signals.send(TerminationSignal::Terminate).unwrap();
    assert_eq!(h.codes.recv().await, Some(0));

    let signal = drain(&mut rx).into_iter().find_map(|event| match event {
        ConnectionEvent::CloseQuit { signal } => Some(signal),
        _ => None,
    });
    assert_eq!(signal.map(|s| s.name()), Some("SIGTERM"));
}

#[tokio::test]
async fn test_second_signal_is_ignored() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_terminate(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);

    h.signals.send(TerminationSignal::Interrupt).unwrap();
    h.signals.send(TerminationSignal::Interrupt).unwrap();
    assert_eq!(h.codes.recv().await, Some(0));
    settle().await;

    assert!(h.codes.try_recv().is_err());
    assert_eq!(conn.driver().close_calls(), 1);
}

#[tokio::test]
async fn test_failed_close_exits_with_error() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_terminate(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);
    conn.driver().fail_close_with("socket hang up");
    let mut rx = conn.subscribe();

    h.signals.send(TerminationSignal::Interrupt).unwrap();
    assert_eq!(h.codes.recv().await, Some(1));
    assert!(drain(&mut rx).iter().all(|event| event.name() != "close-quit"));
}

#[tokio::test]
async fn test_no_watcher_without_flag() {
    let mut h = harness();
    let options = ConnectionOptions::new().with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);

    h.signals.send(TerminationSignal::Interrupt).unwrap();
    settle().await;

    assert!(h.codes.try_recv().is_err());
    assert_eq!(conn.driver().close_calls(), 0);
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_stops_signal_watcher() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_terminate(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);
    assert_ok!(conn.disconnect().await);

    h.signals.send(TerminationSignal::Interrupt).unwrap();
    settle().await;

    assert!(h.codes.try_recv().is_err());
    assert_eq!(conn.driver().close_calls(), 1);
}

#[tokio::test]
async fn test_driver_error_exits_with_one() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_error(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);
    let mut rx = conn.subscribe();

    conn.driver()
        .emit(DriverEvent::error(DriverError::new("topology was destroyed")));
    conn.driver()
        .emit(DriverEvent::error(DriverError::new("second failure")));

    assert_eq!(h.codes.try_recv().ok(), Some(1));
    assert!(h.codes.try_recv().is_err());

    let events = drain(&mut rx);
    let names: Vec<&str> = events.iter().map(ConnectionEvent::name).collect();
    assert_eq!(names, vec!["error", "error-quit", "error"]);
    match &events[1] {
        ConnectionEvent::ErrorQuit { error } => {
            assert_eq!(
                error.as_deref().map(DriverError::message),
                Some("topology was destroyed")
            );
        }
        other => panic!("expected error-quit, got {}", other.name()),
    }
}

#[tokio::test]
async fn test_error_listener_removed_on_disconnect() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_error(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);
    assert_ok!(conn.disconnect().await);

    conn.driver()
        .emit(DriverEvent::error(DriverError::new("late failure")));
    assert!(h.codes.try_recv().is_err());
    assert_eq!(conn.driver().listener_count(), 0);
}

#[tokio::test]
async fn test_exit_on_error_rearms_after_reconnect() {
    let mut h = harness();
    let options = ConnectionOptions::new()
        .exit_on_error(true)
        .with_hooks(h.hooks.clone());
    let conn = Connection::new(URI, MemoryDriver::new(), options);
    assert_ok!(conn.connect().await);

    conn.driver()
        .emit(DriverEvent::error(DriverError::new("first session")));
    assert_eq!(h.codes.try_recv().ok(), Some(1));
    assert!(conn.is_terminating());

    assert_ok!(conn.disconnect().await);
    assert_ok!(conn.connect().await);
    assert!(!conn.is_terminating());

    conn.driver()
        .emit(DriverEvent::error(DriverError::new("second session")));
    assert_eq!(h.codes.try_recv().ok(), Some(1));
}
