//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `http_api` - HTTP API for device ingest, queries and /metrics
//! - `ws` - WebSocket push transport for occupant apps
//! - `mqtt` - MQTT subscriber for device readings
//! - `site_store` - TOML site description backing the directory traits
//! - `notification_log` - Notification history to file (JSONL format)
//! - `prometheus` - Prometheus text exposition

pub mod http_api;
pub mod mqtt;
pub mod notification_log;
pub mod prometheus;
pub mod site_store;
pub mod ws;

// Re-export commonly used types
pub use http_api::{start_http_server, ApiState};
pub use notification_log::NotificationLog;
pub use site_store::SiteStore;
pub use ws::{start_ws_server, WsSettings};
