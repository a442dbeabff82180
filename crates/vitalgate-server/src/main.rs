//! # vitalgate-server
//!
//! Gateway daemon for wearable health monitors.
//!
//! This binary:
//! - Scans for watches over Bluetooth LE and runs one session per device
//! - Forwards vitals and alerts to the ingestion backend
//! - Serves the local status API with OpenAPI documentation
//! - Logs to stdout, and to rolling JSON files in production
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package vitalgate-server
//!
//! # Production (on the gateway)
//! VITALGATE__SERVER__PRODUCTION_LOGGING=true ./vitalgate-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vitalgate_core::{resolve_gateway_id, GatewayConfig, GatewayId, SessionRegistry};
use vitalgate_server::api::create_router;
use vitalgate_server::logging;
use vitalgate_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.server)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting vitalgate-server");

    let gateway = resolve_gateway_id(config.gateway.mac_address.as_deref());
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();
    let registry = SessionRegistry::new(shutdown.clone());

    tokio::spawn(watch_signals(shutdown.clone()));

    let discovery = start_discovery(&config, gateway.clone(), registry.clone(), shutdown.clone()).await;
    let state = AppState::new(gateway, registry, discovery.is_some()).shared();
    let app = create_router(state);

    let addr = config.server.bind_address;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    if let Some(handle) = discovery {
        handle.await.context("Discovery task panicked")?;
    }
    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown requested");
    shutdown.cancel();
}

/// Open the Bluetooth adapter and spawn the discovery driver.
///
/// Returns `None` when no adapter is usable; the status API still runs.
#[cfg(feature = "bluetooth")]
async fn start_discovery(
    config: &Arc<GatewayConfig>,
    gateway: GatewayId,
    registry: SessionRegistry,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    use vitalgate_core::{BluezCentral, DiscoveryDriver, HttpBackend, SessionFactory};

    let central = match BluezCentral::open(&config.bluetooth).await {
        Ok(central) => central,
        Err(e) => {
            error!(error = %e, "Bluetooth unavailable, discovery disabled");
            return None;
        }
    };
    let backend = match HttpBackend::new(&config.backend) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "Backend client unavailable, discovery disabled");
            return None;
        }
    };

    let sessions = SessionFactory::new(central.clone(), backend, gateway, Arc::clone(config));
    let driver = DiscoveryDriver::new(central, sessions, registry, &config.bluetooth);
    Some(tokio::spawn(async move { driver.run(shutdown).await }))
}

#[cfg(not(feature = "bluetooth"))]
async fn start_discovery(
    _config: &Arc<GatewayConfig>,
    _gateway: GatewayId,
    _registry: SessionRegistry,
    _shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    tracing::warn!("Built without Bluetooth support, discovery disabled");
    None
}
