//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `gateway` - Gateway MAC address
//! - `sessions` - Device session listing and cancellation
//! - `system` - Uptime and component status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{delete, get};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod error;
pub mod gateway;
pub mod health;
pub mod openapi;
pub mod sessions;
pub mod system;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                    - Health check
/// /api
/// ├── /get-mac-address       - Gateway MAC address
/// ├── /sessions              - Running device sessions
/// │   └── /{address}         - Cancel one session (DELETE)
/// ├── /system/status         - Uptime and component status
/// ├── /openapi.json          - OpenAPI specification
/// └── /docs                  - Swagger UI
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .route("/get-mac-address", get(gateway::get_mac_address))
                .route("/sessions", get(sessions::list_sessions))
                .route("/sessions/{address}", delete(sessions::cancel_session))
                .route("/system/status", get(system::get_status))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use vitalgate_core::{ConnectionState, DeviceHandle, GatewayId, HealthResponse, SessionRegistry};

    use super::*;
    use crate::state::AppState;

    fn server(gateway: GatewayId, registry: SessionRegistry) -> TestServer {
        let state = AppState::new(gateway, registry, false).shared();
        TestServer::new(create_router(state)).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = server(GatewayId::unknown(), SessionRegistry::default());
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_mac_address_known() {
        let server = server(GatewayId::new("b8:27:eb:12:34:56"), SessionRegistry::default());
        let response = server.get("/api/get-mac-address").await;
        response.assert_status_ok();
        let body: gateway::MacAddressResponse = response.json();
        assert_eq!(body.fbd_mac_address, "b8:27:eb:12:34:56");
    }

    #[tokio::test]
    async fn test_mac_address_unknown_is_404() {
        let server = server(GatewayId::unknown(), SessionRegistry::default());
        let response = server.get("/api/get-mac-address").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: ErrorResponse = response.json();
        assert_eq!(body.message, "MAC address not found");
    }

    #[tokio::test]
    async fn test_list_and_cancel_sessions() {
        let registry = SessionRegistry::default();
        let guard = registry
            .claim(&DeviceHandle::new("C4:7C:8D:6A:1B:22", "GTS-2041"))
            .unwrap();
        guard.state().send_replace(ConnectionState::Streaming);
        let server = server(GatewayId::unknown(), registry);

        let listed: sessions::SessionsResponse = server.get("/api/sessions").await.json();
        assert_eq!(listed.count, 1);
        assert_eq!(listed.sessions[0].address, "C4:7C:8D:6A:1B:22");
        assert_eq!(listed.sessions[0].state, ConnectionState::Streaming);

        let response = server.delete("/api/sessions/C4:7C:8D:6A:1B:22").await;
        response.assert_status_ok();
        assert!(guard.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_errors() {
        let server = server(GatewayId::unknown(), SessionRegistry::default());

        let response = server.delete("/api/sessions/C4:7C:8D:6A:1B:22").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "session_not_found");

        server
            .delete("/api/sessions/not-a-mac")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_system_status_and_openapi() {
        let server = server(GatewayId::new("b8:27:eb:12:34:56"), SessionRegistry::default());

        let status: system::SystemStatusResponse = server.get("/api/system/status").await.json();
        assert_eq!(status.active_sessions, 0);
        assert!(!status.bluetooth_available);
        assert_eq!(status.gateway_mac_address, "b8:27:eb:12:34:56");

        let spec: serde_json::Value = server.get("/api/openapi.json").await.json();
        assert_eq!(spec["info"]["title"], "vitalgate API");
    }
}
