//! Tests for configuration loading and defaults
//!
//! Tests the config system including:
//! - Config defaults
//! - Partial and full JSON documents
//! - Save/load round trips
//! - Building a manager from config

use crate::config::{Config, ConnectionConfig, Directories};
use crate::dispatch::DEFAULT_TIMESTAMP_FORMAT;
use crate::event::event_channel;
use crate::labels::LabelRegistry;
use crate::manager::{ConnectionMode, Manager};
use starwire_proto::{BlobPolicy, DEFAULT_MAX_ELEMENT_SIZE};
use starwire_types::ManagerId;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.server.binary, "indiserver");
    assert!(config.server.verbose);

    assert_eq!(config.connection.host, "localhost");
    assert_eq!(config.connection.port, 7624);
    assert_eq!(config.connection.attempts, 3);
    assert_eq!(config.connection.retry_delay(), Duration::from_millis(100));
    assert_eq!(config.connection.timeout(), Duration::from_secs(1));

    assert_eq!(config.protocol.version, "1.7");
    assert_eq!(config.protocol.blob_policy, BlobPolicy::Also);
    assert_eq!(config.protocol.max_element_bytes, DEFAULT_MAX_ELEMENT_SIZE);

    assert_eq!(config.messages.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
}

#[test]
fn test_config_parse_minimal() {
    let config: Config = serde_json::from_str("{}").unwrap();

    assert_eq!(config.connection.port, 7624);
    assert_eq!(config.server.binary, "indiserver");
}

#[test]
fn test_config_parse_partial() {
    let json = r#"{
        "connection": {
            "host": "observatory.local",
            "attempts": 5
        }
    }"#;

    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.connection.host, "observatory.local");
    assert_eq!(config.connection.attempts, 5);
    assert_eq!(config.connection.port, 7624);
    assert_eq!(config.connection.timeout_ms, 1000);
}

#[test]
fn test_config_parse_full() {
    let json = r#"{
        "server": { "binary": "/opt/indi/bin/indiserver", "verbose": false },
        "connection": {
            "host": "10.0.0.2",
            "port": 7625,
            "attempts": 1,
            "retryDelayMs": 250,
            "timeoutMs": 2000
        },
        "protocol": { "version": "1.8", "blobPolicy": "Never", "maxElementBytes": 1024 },
        "messages": { "timestampFormat": "%H:%M:%S" }
    }"#;

    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.server.binary, "/opt/indi/bin/indiserver");
    assert!(!config.server.verbose);
    assert_eq!(config.connection.port, 7625);
    assert_eq!(config.connection.retry_delay(), Duration::from_millis(250));
    assert_eq!(config.connection.timeout(), Duration::from_secs(2));
    assert_eq!(config.protocol.version, "1.8");
    assert_eq!(config.protocol.blob_policy, BlobPolicy::Never);
    assert_eq!(config.protocol.max_element_bytes, 1024);
    assert_eq!(config.messages.timestamp_format, "%H:%M:%S");
}

#[test]
fn test_config_load_missing_file_returns_default() {
    let temp_dir = TempDir::new().unwrap();

    let config = Config::load(&temp_dir.path().join("nope.json")).unwrap();

    assert_eq!(config.connection.port, 7624);
}

#[test]
fn test_config_load_invalid_json_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(Config::load(&path), Err(crate::Error::Json(_))));
}

#[test]
fn test_config_save_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = Directories::with_base(temp_dir.path().to_path_buf());
    dirs.ensure_exists().unwrap();

    let mut config = Config::default();
    config.connection.host = "telescope.lan".to_string();
    config.protocol.blob_policy = BlobPolicy::Only;
    config.save(&dirs.config_file).unwrap();

    let saved = std::fs::read_to_string(&dirs.config_file).unwrap();
    assert!(saved.contains("\"retryDelayMs\""));
    assert!(saved.contains("\"blobPolicy\": \"Only\""));

    let loaded = Config::load(&dirs.config_file).unwrap();
    assert_eq!(loaded.connection.host, "telescope.lan");
    assert_eq!(loaded.protocol.blob_policy, BlobPolicy::Only);
}

#[test]
fn test_manager_from_config() {
    let config = Config {
        connection: ConnectionConfig {
            host: "10.0.0.2".to_string(),
            port: 7625,
            ..ConnectionConfig::default()
        },
        ..Config::default()
    };
    let (tx, _rx) = event_channel();

    let manager = Manager::from_config(ManagerId(3), &config, Arc::new(LabelRegistry::new()), tx)
        .with_mode(ConnectionMode::Local);

    assert_eq!(manager.id(), ManagerId(3));
    assert_eq!(manager.host(), "10.0.0.2");
    assert_eq!(manager.port(), 7625);
    assert_eq!(manager.mode(), ConnectionMode::Local);
    assert!(manager.devices().is_empty());
}
