//! Gateway identity endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// The gateway's own MAC address.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "fbd_mac_address": "b8:27:eb:12:34:56"
}))]
pub struct MacAddressResponse {
    /// MAC address reported with every sample and alert.
    #[schema(example = "b8:27:eb:12:34:56")]
    pub fbd_mac_address: String,
}

/// Get the gateway MAC address.
#[utoipa::path(
    get,
    path = "/api/get-mac-address",
    tag = "gateway",
    operation_id = "getMacAddress",
    summary = "Get gateway MAC address",
    description = "Returns the MAC address this gateway reports as `fbd_mac_address` \
        to the backend. Responds 404 when no network interface address could be found.",
    responses(
        (status = 200, description = "MAC address resolved", body = MacAddressResponse),
        (status = 404, description = "No MAC address available", body = super::error::ErrorResponse)
    )
)]
pub async fn get_mac_address(
    State(state): State<SharedState>,
) -> ApiResult<Json<MacAddressResponse>> {
    let gateway = state.gateway();
    if !gateway.is_known() {
        return Err(ApiError::NotFound {
            error_code: "mac_address_unknown".to_string(),
            message: "MAC address not found".to_string(),
        });
    }

    Ok(Json(MacAddressResponse {
        fbd_mac_address: gateway.to_string(),
    }))
}
