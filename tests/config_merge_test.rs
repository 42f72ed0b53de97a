//! Integration tests for option parsing and merging.

use docstore_connections::config::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_KEEP_ALIVE_MS, DEFAULT_POOL_SIZE, DriverOverrides,
    RetryOptions,
};
use docstore_connections::db::retry::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_INTERVAL_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_INTERVAL_MS,
};
use docstore_connections::{ConnectionError, ConnectionOptions, merge_config};
use rand::Rng;
use serde_json::json;
use std::io::Write;

fn maybe<R: Rng, T>(rng: &mut R, make: impl FnOnce(&mut R) -> T) -> Option<T> {
    if rng.gen_bool(0.5) {
        Some(make(rng))
    } else {
        None
    }
}

#[test]
fn test_merge_populates_every_field() {
    let config = merge_config(&ConnectionOptions::default());
    let value = serde_json::to_value(&config).unwrap();

    assert_eq!(
        value,
        json!({
            "retry": {
                "max_attempts": 2,
                "backoff_factor": 2.0,
                "initial_interval_ms": 3000,
                "max_interval_ms": 6000
            },
            "driver": {
                "pool_size": 5,
                "auto_reconnect": true,
                "connect_timeout_ms": 30000,
                "keep_alive_ms": 300,
                "reconnect_tries": 2,
                "reconnect_interval_ms": 3000
            },
            "exit_on_error": false,
            "exit_on_terminate": false
        })
    );
}

#[test]
fn test_merge_is_idempotent() {
    let options = ConnectionOptions::from_json_str(
        r#"{ "retry": { "max_attempts": 3 }, "driver": { "ssl": true }, "appName": "x" }"#,
    )
    .unwrap();

    let first = serde_json::to_value(merge_config(&options)).unwrap();
    let second = serde_json::to_value(merge_config(&options)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_partial_retry_keeps_sibling_defaults() {
    let options = ConnectionOptions::new().with_retry(RetryOptions {
        initial_interval_ms: Some(500),
        ..RetryOptions::default()
    });
    let config = merge_config(&options);

    assert_eq!(config.retry.initial_interval_ms, 500);
    assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert_eq!(config.retry.backoff_factor, DEFAULT_BACKOFF_FACTOR);
    assert_eq!(config.retry.max_interval_ms, DEFAULT_MAX_INTERVAL_MS);
}

#[test]
fn test_random_partial_options_merge_field_wise() {
    let mut rng = rand::thread_rng();

    for _ in 0..200 {
        let retry = RetryOptions {
            max_attempts: maybe(&mut rng, |r| r.gen_range(0..10)),
            backoff_factor: maybe(&mut rng, |r| r.gen_range(1.0..4.0)),
            initial_interval_ms: maybe(&mut rng, |r| r.gen_range(1..10_000)),
            max_interval_ms: maybe(&mut rng, |r| r.gen_range(1..60_000)),
            ..RetryOptions::default()
        };
        let driver = DriverOverrides {
            pool_size: maybe(&mut rng, |r| r.gen_range(1..100)),
            auto_reconnect: maybe(&mut rng, |r| r.gen_bool(0.5)),
            connect_timeout_ms: maybe(&mut rng, |r| r.gen_range(1..100_000)),
            keep_alive_ms: maybe(&mut rng, |r| r.gen_range(1..1_000)),
            ..DriverOverrides::default()
        };
        let options = ConnectionOptions::new()
            .with_retry(retry.clone())
            .with_driver(driver.clone());
        let config = merge_config(&options);

        assert_eq!(
            config.retry.max_attempts,
            retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
        );
        assert_eq!(
            config.retry.backoff_factor,
            retry.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR)
        );
        assert_eq!(
            config.retry.initial_interval_ms,
            retry.initial_interval_ms.unwrap_or(DEFAULT_INITIAL_INTERVAL_MS)
        );
        assert_eq!(
            config.retry.max_interval_ms,
            retry.max_interval_ms.unwrap_or(DEFAULT_MAX_INTERVAL_MS)
        );
        assert_eq!(
            config.driver.pool_size,
            driver.pool_size.unwrap_or(DEFAULT_POOL_SIZE)
        );
        assert_eq!(
            config.driver.connect_timeout_ms,
            driver.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS)
        );
        assert_eq!(
            config.driver.keep_alive_ms,
            driver.keep_alive_ms.unwrap_or(DEFAULT_KEEP_ALIVE_MS)
        );
        assert_eq!(config.driver.reconnect_tries, config.retry.max_attempts);
        assert_eq!(
            config.driver.reconnect_interval_ms,
            config.retry.initial_interval_ms
        );
    }
}

#[test]
fn test_unknown_keys_are_preserved() {
    let options = ConnectionOptions::from_json_str(
        r#"{
            "driver": { "poolSize": 20, "readPreference": "secondary" },
            "appName": "inventory",
            "heartbeatFrequencyMS": 500
        }"#,
    )
    .unwrap();
    let config = merge_config(&options);

    assert_eq!(config.driver.pool_size, 20);
    assert_eq!(
        config.driver.extra.get("readPreference"),
        Some(&json!("secondary"))
    );
    assert_eq!(config.extra.get("appName"), Some(&json!("inventory")));
    assert_eq!(config.extra.get("heartbeatFrequencyMS"), Some(&json!(500)));
}

#[test]
fn test_reconnect_keys_fill_the_whole_policy() {
    let options = ConnectionOptions::from_json_str(
        r#"{
            "reconnect": {
                "reconnectTries": 4,
                "reconnectFactor": 3,
                "reconnectInterval": 100,
                "reconnectMaxInterval": 9000,
                "jitter": true
            }
        }"#,
    )
    .unwrap();
    let config = merge_config(&options);

    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.backoff_factor, 3.0);
    assert_eq!(config.retry.initial_interval_ms, 100);
    assert_eq!(config.retry.max_interval_ms, 9000);
    assert_eq!(config.retry_extra.get("jitter"), Some(&json!(true)));
    assert!(config.extra.is_empty());
}

#[test]
fn test_options_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "reconnect": {{ "reconnectTries": 5, "reconnectInterval": 100 }}, "exitOnTerminate": true }}"#
    )
    .unwrap();

    let options = ConnectionOptions::from_file(file.path()).unwrap();
    let config = merge_config(&options);

    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_interval_ms, 100);
    assert_eq!(config.retry.max_interval_ms, DEFAULT_MAX_INTERVAL_MS);
    assert!(config.exit_on_terminate);
    assert!(!config.exit_on_error);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConnectionOptions::from_file(dir.path().join("missing.json")).unwrap_err();

    assert!(matches!(err, ConnectionError::Config { .. }));
    assert!(err.suggestion().is_some());
}
