//! System status endpoint.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// System status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "started_at_utc": "2025-03-01T12:00:00Z",
    "bluetooth_available": true,
    "gateway_mac_address": "b8:27:eb:12:34:56",
    "active_sessions": 2
}))]
pub struct SystemStatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// When the server started.
    pub started_at_utc: DateTime<Utc>,

    /// Whether discovery is running on a Bluetooth adapter.
    #[schema(example = true)]
    pub bluetooth_available: bool,

    /// Gateway identity, `UNKNOWN_HOST_MAC` if none was found.
    #[schema(example = "b8:27:eb:12:34:56")]
    pub gateway_mac_address: String,

    /// Number of running device sessions.
    #[schema(example = 2)]
    pub active_sessions: usize,
}

/// Get system status.
#[utoipa::path(
    get,
    path = "/api/system/status",
    tag = "system",
    operation_id = "getSystemStatus",
    summary = "Get system status",
    description = "Returns the current system status including version, uptime, \
        Bluetooth availability and the number of device sessions.",
    responses(
        (status = 200, description = "System status retrieved", body = SystemStatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<SystemStatusResponse> {
    Json(SystemStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        started_at_utc: state.started_at_utc(),
        bluetooth_available: state.bluetooth_available(),
        gateway_mac_address: state.gateway().to_string(),
        active_sessions: state.registry().len(),
    })
}
