//! HTTP API
//!
//! Device ingest, on-demand route and history queries, health and
//! Prometheus metrics, served with hyper over HTTP/1.
//!
//! Routes:
//! - `POST /api/measurements/receive` - ingest a device reading
//! - `GET  /api/sensors/{id}` - sensor threshold lookup
//! - `GET  /api/sensors/{id}/measurements` - retained measurements
//! - `GET  /api/rooms/{id}/evacuation-route` - route without notifying
//! - `GET  /api/users/{id}/notifications` - alert history, newest first
//! - `POST /api/notifications/{id}/read` - mark a notification read
//! - `GET  /health`, `GET /metrics`

use crate::domain::types::{Sensor, SensorReading};
use crate::infra::metrics::Metrics;
use crate::io::prometheus;
use crate::services::directory::{MeasurementLog, NotificationStore, SensorDirectory, StoreError};
use crate::services::dispatch::DispatchError;
use crate::services::ingest::{Ingest, IngestOutcome};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Everything the handlers need
pub struct ApiState {
    pub ingest: Arc<Ingest>,
    pub sensors: Arc<dyn SensorDirectory>,
    pub notifications: Arc<dyn NotificationStore>,
    pub measurements: Arc<dyn MeasurementLog>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

/// Sensor as exposed to devices
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorView<'a> {
    id: String,
    room_id: String,
    sensor_name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    threshold: f64,
}

impl<'a> From<&'a Sensor> for SensorView<'a> {
    fn from(sensor: &'a Sensor) -> Self {
        Self {
            id: sensor.id.to_string(),
            room_id: sensor.room_id.to_string(),
            sensor_name: &sensor.name,
            kind: &sensor.kind,
            threshold: sensor.threshold,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::new()))
        .expect("static response should not fail")
}

fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn message(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json(status, &ErrorBody { message })
}

fn internal_error(e: &dyn std::fmt::Display) -> Response<Full<Bytes>> {
    error!(error = %e, "request_failed");
    message(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn parse_id<T: FromStr>(raw: &str) -> Result<T, Response<Full<Bytes>>> {
    raw.parse().map_err(|_| message(StatusCode::BAD_REQUEST, "invalid id"))
}

/// Route one request
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    debug!(method = %method, path = %path, "http_request");

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (&Method::GET, ["metrics"]) => {
            let body = prometheus::format_prometheus_metrics(&state.metrics, &state.site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", prometheus::CONTENT_TYPE)
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::POST, ["api", "measurements", "receive"]) => {
            receive_measurement(req.into_body(), &state).await
        }
        (&Method::GET, ["api", "sensors", id]) => get_sensor(id, &state).await,
        (&Method::GET, ["api", "sensors", id, "measurements"]) => {
            get_measurements(id, &state).await
        }
        (&Method::GET, ["api", "rooms", id, "evacuation-route"]) => {
            get_evacuation_route(id, &state).await
        }
        (&Method::GET, ["api", "users", id, "notifications"]) => {
            get_notifications(id, &state).await
        }
        (&Method::POST, ["api", "notifications", id, "read"]) => mark_read(id, &state).await,
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail"),
    };

    Ok(response)
}

async fn receive_measurement<B>(body: B, state: &ApiState) -> Response<Full<Bytes>>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "measurement_body_read_failed");
            return message(StatusCode::BAD_REQUEST, "unreadable body");
        }
    };

    let reading: SensorReading = match serde_json::from_slice(&bytes) {
        Ok(reading) => reading,
        Err(e) => {
            warn!(error = %e, "measurement_body_invalid");
            return message(StatusCode::BAD_REQUEST, "invalid measurement");
        }
    };

    match state.ingest.ingest_reading(reading).await {
        Ok(IngestOutcome::BelowThreshold) => empty(StatusCode::OK),
        Ok(IngestOutcome::Dispatched(route)) => json(StatusCode::OK, &route),
        Err(DispatchError::SensorNotFound(_)) => message(StatusCode::BAD_REQUEST, "Sensor not found"),
        Err(DispatchError::RoomNotFound(_)) => message(StatusCode::BAD_REQUEST, "Room not found"),
        Err(e) => internal_error(&e),
    }
}

async fn get_sensor(raw_id: &str, state: &ApiState) -> Response<Full<Bytes>> {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.sensors.sensor(id).await {
        Ok(Some(sensor)) => json(StatusCode::OK, &SensorView::from(&sensor)),
        Ok(None) => message(StatusCode::NOT_FOUND, "Sensor not found"),
        Err(e) => internal_error(&e),
    }
}

async fn get_measurements(raw_id: &str, state: &ApiState) -> Response<Full<Bytes>> {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.measurements.for_sensor(id).await {
        Ok(list) => json(StatusCode::OK, &list),
        Err(e) => internal_error(&e),
    }
}

async fn get_evacuation_route(raw_id: &str, state: &ApiState) -> Response<Full<Bytes>> {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.ingest.dispatcher().evacuation_route(id).await {
        Ok(route) => json(StatusCode::OK, &route),
        Err(DispatchError::RoomNotFound(_)) => message(StatusCode::NOT_FOUND, "Room not found"),
        Err(e) => internal_error(&e),
    }
}

async fn get_notifications(raw_id: &str, state: &ApiState) -> Response<Full<Bytes>> {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.notifications.list_for_user(id).await {
        Ok(list) => json(StatusCode::OK, &list),
        Err(e) => internal_error(&e),
    }
}

async fn mark_read(raw_id: &str, state: &ApiState) -> Response<Full<Bytes>> {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.notifications.mark_as_read(id).await {
        Ok(()) => empty(StatusCode::NO_CONTENT),
        Err(StoreError::NotFound(_)) => message(StatusCode::NOT_FOUND, "Notification not found"),
        Err(e) => internal_error(&e),
    }
}

/// Start the HTTP API server
pub async fn start_http_server(
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "http_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
