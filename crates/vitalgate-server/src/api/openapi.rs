//! OpenAPI specification generation for the vitalgate status API.
//!
//! The document is served at `/api/openapi.json`, rendered by Swagger UI at
//! `/api/docs`, and written to disk by the `gen-openapi` binary.

use axum::Json;
use utoipa::OpenApi;
use vitalgate_core::{ConnectionState, HealthResponse, SessionInfo};

use super::error::ErrorResponse;
use super::gateway::MacAddressResponse;
use super::sessions::{CancelSessionResponse, SessionsResponse};
use super::system::SystemStatusResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for vitalgate.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "vitalgate API",
        version = "0.1.0",
        description = r#"
# vitalgate API

vitalgate is a Bluetooth LE gateway for wearable health monitors. It finds
watches, switches their sensors on, polls them for vitals and forwards the
readings and any health alerts to the ingestion backend.

This local API exposes the gateway's identity and the state of its device
sessions. It is read-mostly: the only mutation is stopping a session.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local vitalgate gateway")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and system status"
        ),
        (
            name = "gateway",
            description = "Gateway identity as reported to the backend"
        ),
        (
            name = "sessions",
            description = "Device sessions started by discovery"
        )
    ),
    paths(
        super::health::health_check,
        super::gateway::get_mac_address,
        super::sessions::list_sessions,
        super::sessions::cancel_session,
        super::system::get_status,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            MacAddressResponse,
            SessionsResponse,
            SessionInfo,
            ConnectionState,
            CancelSessionResponse,
            SystemStatusResponse,
        )
    )
)]
pub struct ApiDoc;
