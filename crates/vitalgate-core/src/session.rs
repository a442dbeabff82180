//! One device session: connect, configure, poll.
//!
//! A session owns its link, classifier state and battery level; nothing about
//! it is shared with other sessions except the registry entry held by its
//! [`SessionGuard`]. When the session ends, for whatever reason, the guard
//! is dropped and the address becomes eligible for discovery again.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::Backend;
use crate::config::GatewayConfig;
use crate::discovery::SessionGuard;
use crate::error::GatewayResult;
use crate::identity::GatewayId;
use crate::lifecycle::ConnectionManager;
use crate::polling::{PollExit, PollingLoop};
use crate::transport::{Characteristics, Link, Transport};
use crate::types::{ConnectionState, DeviceHandle};

/// Runs device sessions with shared transport, backend and configuration.
#[derive(Debug)]
pub struct SessionFactory<T, B> {
    manager: ConnectionManager<T, B>,
    backend: B,
    gateway: GatewayId,
    config: Arc<GatewayConfig>,
    chars: Characteristics,
}

impl<T: Clone, B: Clone> Clone for SessionFactory<T, B> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            backend: self.backend.clone(),
            gateway: self.gateway.clone(),
            config: Arc::clone(&self.config),
            chars: self.chars,
        }
    }
}

impl<T, B> SessionFactory<T, B>
where
    T: Transport + Clone,
    B: Backend + Clone,
{
    /// Create a factory.
    pub fn new(transport: T, backend: B, gateway: GatewayId, config: Arc<GatewayConfig>) -> Self {
        let chars = Characteristics::from(&config.bluetooth);
        let manager = ConnectionManager::new(
            transport,
            backend.clone(),
            gateway.clone(),
            config.connection.clone(),
            config.handshake.clone(),
            chars,
        );
        Self {
            manager,
            backend,
            gateway,
            config,
            chars,
        }
    }

    /// Run a full session for `device` under the registry claim `guard`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GatewayError::ConnectionFailed`] when every connection
    /// attempt failed, [`crate::GatewayError::Cancelled`] when cancelled before
    /// streaming, or the transport error that ended polling.
    pub async fn run(&self, device: DeviceHandle, guard: SessionGuard) -> GatewayResult<PollExit> {
        let span = info_span!("session", address = %device.address, name = %device.name);
        self.run_inner(device, guard).instrument(span).await
    }

    async fn run_inner(&self, device: DeviceHandle, guard: SessionGuard) -> GatewayResult<PollExit> {
        info!("Session started");
        let connected = self
            .manager
            .establish(&device, guard.state(), guard.cancel_token())
            .await?;

        let mut polling = PollingLoop::new(
            self.backend.clone(),
            device.address.clone(),
            self.gateway.clone(),
            &self.config,
        );
        let result = polling
            .run(&connected.link, self.chars, guard.cancel_token())
            .await;

        if let Err(e) = connected.link.disconnect().await {
            debug!(error = %e, "Disconnect failed");
        }
        guard.state().send_replace(ConnectionState::Disconnected);

        match result {
            Ok(exit) => {
                info!(?exit, "Session ended");
                Ok(exit)
            }
            Err(e) => {
                warn!(error = %e, "Session ended on transport error");
                Err(e.into())
            }
        }
    }
}
