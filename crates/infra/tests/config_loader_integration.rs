//! Configuration loader coverage for the file-based path.
//!
//! Environment-variable loading is covered implicitly by the fallback
//! logic; these tests pin the file formats and error shapes.

use std::fs;

use portbroker_domain::BrokerError;
use portbroker_infra::config::load_from_file;
use tempfile::TempDir;

#[test]
fn loads_toml_config() {
    let dir = TempDir::new().expect("tempdir created");
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[database]
path = "broker.db"
pool_size = 4

[provider]
base_url = "https://provider.test/v1"
api_key = "key"
timeout_seconds = 10
page_size = 50

[relay]
config_path = "/tmp/relay.cfg"
bind_host = "127.0.0.1"
socks_port_offset = 1000
reload_command = ["true"]
reload_timeout_seconds = 5
rebuild_interval_seconds = 120

[expiry]
sweep_interval_seconds = 30
"#,
    )
    .expect("config written");

    let config = load_from_file(Some(&path)).expect("toml config should load");
    assert_eq!(config.database.path, "broker.db");
    assert_eq!(config.database.pool_size, 4);
    assert_eq!(config.provider.page_size, 50);
    assert_eq!(config.relay.reload_command, vec!["true"]);
    assert_eq!(config.expiry.sweep_interval_seconds, 30);
}

#[test]
fn loads_json_config() {
    let dir = TempDir::new().expect("tempdir created");
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
  "database": {"path": "broker.db", "pool_size": 8},
  "provider": {
    "base_url": "https://provider.test/v1",
    "api_key": "key",
    "timeout_seconds": 10,
    "page_size": 100
  },
  "relay": {
    "config_path": "/tmp/relay.cfg",
    "bind_host": "0.0.0.0",
    "socks_port_offset": 1000,
    "reload_command": [],
    "reload_timeout_seconds": 5,
    "rebuild_interval_seconds": 300
  },
  "expiry": {"sweep_interval_seconds": 60}
}"#,
    )
    .expect("config written");

    let config = load_from_file(Some(&path)).expect("json config should load");
    assert_eq!(config.database.pool_size, 8);
    assert!(config.relay.reload_command.is_empty());
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir created");
    let path = dir.path().join("absent.toml");

    let err = load_from_file(Some(&path)).expect_err("missing file should fail");
    assert!(matches!(err, BrokerError::Config(_)));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir created");
    let path = dir.path().join("config.toml");
    fs::write(&path, "not = [valid").expect("config written");

    let err = load_from_file(Some(&path)).expect_err("malformed file should fail");
    assert!(matches!(err, BrokerError::Config(_)));
}
