//! HTTP API handlers
//!
//! Read-only JSON views for dashboards and health checks. Device control
//! goes through the MCP tools at `/mcp`.

use crate::adapters::mqtt::MqttAdapter;
use crate::bus::SharedBus;
use crate::error::HubError;
use crate::registry::normalize_room;
use crate::router::CommandRouter;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CommandRouter>,
    pub mqtt: Arc<MqttAdapter>,
    pub bus: SharedBus,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(router: Arc<CommandRouter>, mqtt: Arc<MqttAdapter>, bus: SharedBus) -> Self {
        Self {
            router,
            mqtt,
            bus,
            started_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub rooms: usize,
    pub devices: usize,
    pub mqtt_configured: bool,
    pub mqtt_connected: bool,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let records = state.router.registry().records().await;
    let mqtt_status = state.mqtt.get_status().await;

    Json(StatusResponse {
        service: "smart-home-hub",
        version: env!("HUB_VERSION"),
        git_sha: env!("HUB_GIT_SHA"),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        rooms: records.len(),
        devices: records.values().map(|devices| devices.len()).sum(),
        mqtt_configured: mqtt_status.host.is_some(),
        mqtt_connected: mqtt_status.connected,
        bus_subscribers: state.bus.subscriber_count(),
    })
}

/// GET /devices - every device grouped by room
pub async fn devices_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.registry().records().await)
}

/// GET /devices/{room}/{name} - one device, room aliases accepted
pub async fn device_handler(
    State(state): State<AppState>,
    Path((room, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.router.registry().get(&room, &name).await {
        Some(slot) => (StatusCode::OK, Json(slot.record().await)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: HubError::not_found(&normalize_room(&room), name.trim()).to_string(),
            }),
        )
            .into_response(),
    }
}
