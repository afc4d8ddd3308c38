//! Safe Escape - smoke alarm evacuation gateway
//!
//! Receives smoke readings from room sensors, computes the shortest route
//! to an exit and pushes it to every occupant of the building.
//!
//! Module structure:
//! - `domain/` - Core types, topology graph, shortest-path engine
//! - `io/` - External interfaces (HTTP, WebSocket, MQTT, site store)
//! - `services/` - Business logic (Registry, Dispatcher, Ingest)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use safe_escape::infra::{Config, Metrics};
use safe_escape::io::{
    start_http_server, start_ws_server, ApiState, NotificationLog, SiteStore, WsSettings,
};
use safe_escape::services::{create_ingest_worker, AlertDispatcher, ConnectionRegistry, Directories, Ingest};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Safe Escape - evacuation routing and alert dispatch
#[derive(Parser, Debug)]
#[command(name = "safe-escape", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-occupant delivery detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_json);

    info!(git_hash = %env!("GIT_HASH"), version = %env!("CARGO_PKG_VERSION"), "safe-escape starting");

    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        http_port = %config.http_port(),
        ws_port = %config.ws_port(),
        mqtt_enabled = %config.mqtt_enabled(),
        site_file = %config.site_file(),
        notifications_file = ?config.notifications_file(),
        "config_loaded"
    );

    let mut store = SiteStore::from_file(config.site_file())?;
    if let Some(path) = config.notifications_file() {
        store = store.with_notification_log(NotificationLog::new(path));
    }
    let store = Arc::new(store);

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(AlertDispatcher::new(
        Directories::from_store(store.clone()),
        registry.clone(),
        metrics.clone(),
    ));
    let ingest = Arc::new(Ingest::new(store.clone(), store.clone(), dispatcher, metrics.clone()));

    // WebSocket push transport
    let ws_settings = WsSettings { outbound_queue: config.ws_outbound_queue() };
    let ws_port = config.ws_port();
    let ws_registry = registry.clone();
    let ws_metrics = metrics.clone();
    let ws_shutdown = shutdown_rx.clone();
    let ws_task = tokio::spawn(async move {
        if let Err(e) = start_ws_server(ws_port, ws_registry, ws_metrics, ws_settings, ws_shutdown).await {
            error!(error = %e, "ws_server_error");
        }
    });

    // MQTT ingest (queued, never blocks the eventloop)
    if config.mqtt_enabled() {
        let (reading_tx, worker) = create_ingest_worker(ingest.clone(), config.ingest_queue_size());
        tokio::spawn(worker.run());

        let mqtt_config = config.clone();
        let mqtt_metrics = metrics.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                safe_escape::io::mqtt::start_mqtt_client(&mqtt_config, reading_tx, mqtt_metrics, mqtt_shutdown)
                    .await
            {
                error!(error = %e, "mqtt_client_error");
            }
        });
    }

    // HTTP API (if port > 0)
    let http_task = if config.http_port() > 0 {
        let state = Arc::new(ApiState {
            ingest,
            sensors: store.clone(),
            notifications: store.clone(),
            measurements: store,
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
        });
        let http_port = config.http_port();
        let http_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, state, http_shutdown).await {
                error!(error = %e, "http_api_error");
            }
        }))
    } else {
        info!("http_api_disabled");
        None
    };

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    let _ = ws_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }

    info!("safe-escape shutdown complete");
    Ok(())
}
