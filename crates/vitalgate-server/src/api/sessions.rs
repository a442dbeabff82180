//! Device session endpoints.
//!
//! Lists the sessions the discovery driver is running and lets an operator
//! stop one. A stopped device is picked up again by the next scan.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use vitalgate_core::{is_valid_mac_address, SessionInfo};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Running device sessions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionsResponse {
    /// Number of sessions.
    #[schema(example = 1)]
    pub count: usize,

    /// Sessions ordered by device address.
    pub sessions: Vec<SessionInfo>,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "C4:7C:8D:6A:1B:22",
    "cancelled": true
}))]
pub struct CancelSessionResponse {
    /// Device address.
    #[schema(example = "C4:7C:8D:6A:1B:22")]
    pub address: String,

    /// Whether cancellation was requested.
    pub cancelled: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// List running device sessions.
#[utoipa::path(
    get,
    path = "/api/sessions",
    tag = "sessions",
    operation_id = "listSessions",
    summary = "List device sessions",
    description = "Returns every device session with its current connection state.",
    responses(
        (status = 200, description = "Sessions listed", body = SessionsResponse)
    )
)]
pub async fn list_sessions(State(state): State<SharedState>) -> Json<SessionsResponse> {
    let sessions = state.registry().snapshot();
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

/// Cancel the session for one device.
#[utoipa::path(
    delete,
    path = "/api/sessions/{address}",
    tag = "sessions",
    operation_id = "cancelSession",
    summary = "Cancel a device session",
    description = "Stops the session for the given device. The device becomes eligible \
        for discovery again once the session has wound down.",
    params(
        ("address" = String, Path, description = "Device MAC address", example = "C4:7C:8D:6A:1B:22")
    ),
    responses(
        (status = 200, description = "Cancellation requested", body = CancelSessionResponse),
        (status = 400, description = "Malformed address", body = super::error::ErrorResponse),
        (status = 404, description = "No session for this device", body = super::error::ErrorResponse)
    )
)]
pub async fn cancel_session(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<CancelSessionResponse>> {
    if !is_valid_mac_address(&address) {
        return Err(ApiError::BadRequest {
            error_code: "invalid_bluetooth_address".to_string(),
            message: format!("'{address}' is not in XX:XX:XX:XX:XX:XX format"),
        });
    }

    state.registry().cancel(&address)?;
    info!(address = %address, "Session cancelled via API");

    Ok(Json(CancelSessionResponse {
        address,
        cancelled: true,
    }))
}
