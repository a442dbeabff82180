//! Application state shared across handlers.
//!
//! Everything here is written once at startup. The session registry is the
//! only live part, and it carries its own locking.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use vitalgate_core::{GatewayId, SessionRegistry};

/// Shared handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Gateway identity, running sessions and startup facts.
#[derive(Debug)]
pub struct AppState {
    gateway: GatewayId,
    registry: SessionRegistry,
    bluetooth_available: bool,
    started: Instant,
    started_at_utc: DateTime<Utc>,
}

impl AppState {
    /// Create state for a gateway with the given identity and session registry.
    #[must_use]
    pub fn new(gateway: GatewayId, registry: SessionRegistry, bluetooth_available: bool) -> Self {
        Self {
            gateway,
            registry,
            bluetooth_available,
            started: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    /// Wrap in an [`Arc`] for the router.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// The gateway's MAC address.
    #[must_use]
    pub const fn gateway(&self) -> &GatewayId {
        &self.gateway
    }

    /// Running device sessions.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Whether discovery is running on a Bluetooth adapter.
    #[must_use]
    pub const fn bluetooth_available(&self) -> bool {
        self.bluetooth_available
    }

    /// Seconds since startup.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Wall-clock startup time.
    #[must_use]
    pub const fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }
}
