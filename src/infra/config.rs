//! Configuration loading from TOML files
//!
//! The binary picks the file (`--config`, then `CONFIG_FILE`, then
//! `config/dev.toml`); a missing or invalid file falls back to defaults.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier used as the metrics `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "safe-escape".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// HTTP API port (ingest, queries, /metrics); 0 disables the server
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    /// WebSocket push port
    #[serde(default = "default_ws_port")]
    pub port: u16,
    /// Per-connection outbound queue capacity
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self { port: default_ws_port(), outbound_queue: default_outbound_queue() }
    }
}

fn default_ws_port() -> u16 {
    8081
}

fn default_outbound_queue() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic filter for device readings
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "sensors/+/readings".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// TOML file describing buildings, rooms, topology, sensors and occupants
    #[serde(default = "default_site_file")]
    pub site_file: String,
    /// JSONL file receiving every created notification (empty to disable)
    #[serde(default = "default_notifications_file")]
    pub notifications_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { site_file: default_site_file(), notifications_file: default_notifications_file() }
    }
}

fn default_site_file() -> String {
    "config/site.toml".to_string()
}

fn default_notifications_file() -> String {
    "notifications.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Bounded queue between MQTT ingest and the ingest worker
    #[serde(default = "default_ingest_queue")]
    pub queue_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { queue_size: default_ingest_queue() }
    }
}

fn default_ingest_queue() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_port: u16,
    ws_port: u16,
    ws_outbound_queue: usize,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    site_file: String,
    notifications_file: String,
    ingest_queue_size: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            http_port: toml_config.http.port,
            ws_port: toml_config.ws.port,
            ws_outbound_queue: toml_config.ws.outbound_queue.max(1),
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            site_file: toml_config.store.site_file,
            notifications_file: toml_config.store.notifications_file,
            ingest_queue_size: toml_config.ingest.queue_size.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_port
    }

    pub fn ws_outbound_queue(&self) -> usize {
        self.ws_outbound_queue
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn site_file(&self) -> &str {
        &self.site_file
    }

    /// Notification JSONL path, `None` when disabled
    pub fn notifications_file(&self) -> Option<&str> {
        Some(self.notifications_file.as_str()).filter(|path| !path.is_empty())
    }

    pub fn ingest_queue_size(&self) -> usize {
        self.ingest_queue_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point at a site file
    #[cfg(test)]
    pub fn with_site_file(mut self, path: &str) -> Self {
        self.site_file = path.to_string();
        self
    }
}
