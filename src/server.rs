use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::alarms::Alarm;
use crate::hub::TelemetryHub;
use crate::liveness::run_liveness;
use crate::pump::{run_pump, TelemetryPump};
use crate::sample::SampleSource;
use crate::websocket::{handle_websocket, StreamState};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: usize,
    pub active_connections: usize,
    pub active_alarms: usize,
    pub uptime_seconds: u64,
}

/// Health check endpoint
pub async fn health_check(State(state): State<StreamState>) -> (StatusCode, Json<HealthResponse>) {
    let hub = &state.hub;
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: hub.connection_count(),
        active_connections: hub.active_connection_count(),
        active_alarms: hub.active_alarm_count(),
        uptime_seconds: hub.uptime_seconds(),
    };

    (StatusCode::OK, Json(response))
}

/// All alarms since startup, acknowledged ones included
pub async fn list_alarms(State(state): State<StreamState>) -> Json<Vec<Alarm>> {
    Json(state.hub.alarms())
}

/// Build the HTTP router around `hub`
pub fn router(hub: Arc<TelemetryHub>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health_check))
        .route("/api/alarms", get(list_alarms))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(StreamState { hub })
}

/// CORS for the given origins; any origin when the list is empty
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

/// Spawn the telemetry pump and the liveness monitor
pub fn spawn_background_tasks(
    hub: Arc<TelemetryHub>,
    source: Box<dyn SampleSource>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let pump = TelemetryPump::new(source, hub.config().geo_divisor);
    vec![
        tokio::spawn(run_pump(pump, hub.clone(), shutdown.clone())),
        tokio::spawn(run_liveness(hub, shutdown)),
    ]
}
