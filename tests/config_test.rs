//! Integration tests for configuration loading

use safe_escape::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[http]
port = 9080

[ws]
port = 9081
outbound_queue = 8

[mqtt]
enabled = true
host = "test-host"
port = 1884
topic = "test/+/readings"
username = "sensor"
password = "secret"

[store]
site_file = "/etc/safe-escape/site.toml"
notifications_file = "/var/lib/safe-escape/notifications.jsonl"

[ingest]
queue_size = 250

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.http_port(), 9080);
    assert_eq!(config.ws_port(), 9081);
    assert_eq!(config.ws_outbound_queue(), 8);
    assert!(config.mqtt_enabled());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "test/+/readings");
    assert_eq!(config.mqtt_username(), Some("sensor"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert_eq!(config.site_file(), "/etc/safe-escape/site.toml");
    assert_eq!(config.notifications_file(), Some("/var/lib/safe-escape/notifications.jsonl"));
    assert_eq!(config.ingest_queue_size(), 250);
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_partial_config_uses_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[http]\nport = 7000\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.http_port(), 7000);
    assert_eq!(config.ws_port(), 8081);
    assert!(!config.mqtt_enabled());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[http\nport = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.http_port(), 8080);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_bundled_dev_config_loads() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(config.site_file(), "config/site.toml");
}
