//! Per-device connection lifecycle.
//!
//! ```text
//! Disconnected -> Connecting{1} -> Handshaking -> Streaming
//!                      |  failure
//!                      v
//!                 Connecting{2} ... Connecting{max} -> Failed (+ one alert)
//! ```
//!
//! Each attempt connects, checks the link is really up, optionally sends the
//! bind request, then runs the three configuration handshakes. Handshakes that
//! go unacknowledged do not fail the attempt; transport errors do. Attempts are
//! separated by the retry delay, with no delay after the last one.

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::{ConnectionConfig, HandshakeConfig};
use crate::handshake::{self, Handshake};
use crate::identity::GatewayId;
use crate::transport::{Characteristics, Link, Transport, TransportError, TransportResult};
use crate::types::{AlertEvent, ConnectionState, DeviceHandle};

/// Why a device could not be brought to streaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Every attempt failed; the connection alert has been sent.
    #[error("Failed to connect to device {address} after {attempts} attempts")]
    AttemptsExhausted {
        /// Device address.
        address: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The session was cancelled before streaming started.
    #[error("Connection cancelled")]
    Cancelled,
}

/// A configured device ready for polling.
#[derive(Debug)]
pub struct ConnectedDevice<L> {
    /// The open link.
    pub link: L,
    /// Device address.
    pub address: String,
    /// Attempt that succeeded (1-based).
    pub attempt: u32,
}

/// Drives devices from discovery to streaming.
#[derive(Debug, Clone)]
pub struct ConnectionManager<T, B> {
    transport: T,
    backend: B,
    gateway: GatewayId,
    connection: ConnectionConfig,
    handshake: HandshakeConfig,
    chars: Characteristics,
}

impl<T, B> ConnectionManager<T, B>
where
    T: Transport,
    B: Backend,
{
    /// Create a manager.
    pub const fn new(
        transport: T,
        backend: B,
        gateway: GatewayId,
        connection: ConnectionConfig,
        handshake: HandshakeConfig,
        chars: Characteristics,
    ) -> Self {
        Self {
            transport,
            backend,
            gateway,
            connection,
            handshake,
            chars,
        }
    }

    /// Connect and configure `device`, publishing each state change to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AttemptsExhausted`] after the last failed
    /// attempt (and after sending exactly one connection alert), or
    /// [`LifecycleError::Cancelled`] if `cancel` fires first.
    pub async fn establish(
        &self,
        device: &DeviceHandle,
        state: &watch::Sender<ConnectionState>,
        cancel: &CancellationToken,
    ) -> Result<ConnectedDevice<T::Link>, LifecycleError> {
        let max_attempts = self.connection.max_attempts;

        for attempt in 1..=max_attempts {
            state.send_replace(ConnectionState::Connecting { attempt });
            info!(address = %device.address, attempt, max_attempts, "Connecting");

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled(state)),
                result = self.attempt(&device.address, state) => result,
            };

            match result {
                Ok(link) => {
                    state.send_replace(ConnectionState::Streaming);
                    info!(address = %device.address, attempt, "Device ready for streaming");
                    return Ok(ConnectedDevice {
                        link,
                        address: device.address.clone(),
                        attempt,
                    });
                }
                Err(e) => {
                    warn!(address = %device.address, attempt, error = %e, "Connection attempt failed");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(self.cancelled(state)),
                    () = tokio::time::sleep(self.connection.retry_delay()) => {}
                }
            }
        }

        state.send_replace(ConnectionState::Failed);
        error!(address = %device.address, attempts = max_attempts, "Giving up on device");

        let alert = AlertEvent::connection_failure(&device.address, self.gateway.as_str(), max_attempts);
        if let Err(e) = self.backend.send_alert(&alert).await {
            error!(address = %device.address, error = %e, "Failed to send connection alert");
        }

        Err(LifecycleError::AttemptsExhausted {
            address: device.address.clone(),
            attempts: max_attempts,
        })
    }

    fn cancelled(&self, state: &watch::Sender<ConnectionState>) -> LifecycleError {
        debug!(gateway = %self.gateway, "Connection cancelled");
        state.send_replace(ConnectionState::Disconnected);
        LifecycleError::Cancelled
    }

    async fn attempt(
        &self,
        address: &str,
        state: &watch::Sender<ConnectionState>,
    ) -> TransportResult<T::Link> {
        let link = self.transport.connect(address).await?;
        if !link.is_connected().await {
            close(address, &link).await;
            return Err(TransportError::Disconnected);
        }

        state.send_replace(ConnectionState::Handshaking);
        if let Err(e) = self.configure(address, &link).await {
            close(address, &link).await;
            return Err(e);
        }
        Ok(link)
    }

    async fn configure(&self, address: &str, link: &T::Link) -> TransportResult<()> {
        if self.connection.bind_on_connect {
            let outcome = handshake::bind(link, self.chars, self.handshake.bind_window()).await?;
            info!(address, ?outcome, "Bind result");
        }

        for step in Handshake::configuration_sequence(&self.handshake) {
            let outcome = step.run(link, self.chars).await?;
            if let Err(e) = outcome.ensure_acked(step.name) {
                warn!(address, error = %e, "Continuing without acknowledgement");
            }
        }
        Ok(())
    }
}

/// Release a link that will not be used, logging but otherwise ignoring failure.
async fn close<L: Link>(address: &str, link: &L) {
    if let Err(e) = link.disconnect().await {
        debug!(address, error = %e, "Disconnect of abandoned link failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::handshake::{
        BIND_REQUEST, ENABLE_SENSORS_ACK, ENABLE_SENSORS_COMMAND, MASTER_SWITCH_ACK,
        MASTER_SWITCH_COMMAND, SET_INTERVAL_ACK, SET_INTERVAL_COMMAND,
    };
    use crate::mock::{MockTransport, RecordingBackend};
    use crate::types::AlertCategory;

    const ADDRESS: &str = "C4:7C:8D:6A:1B:22";

    fn acking(transport: MockTransport) -> MockTransport {
        transport
            .reply(ENABLE_SENSORS_COMMAND, &[ENABLE_SENSORS_ACK])
            .reply(MASTER_SWITCH_COMMAND, &[MASTER_SWITCH_ACK])
            .reply(SET_INTERVAL_COMMAND, &[SET_INTERVAL_ACK])
    }

    fn manager(
        transport: &MockTransport,
        backend: &RecordingBackend,
        connection: ConnectionConfig,
    ) -> ConnectionManager<MockTransport, RecordingBackend> {
        ConnectionManager::new(
            transport.clone(),
            backend.clone(),
            GatewayId::new("B8:27:EB:00:00:01"),
            connection,
            HandshakeConfig::default(),
            Characteristics::default(),
        )
    }

    fn device() -> DeviceHandle {
        DeviceHandle::new(ADDRESS, "GTS-2041")
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_alert_once() {
        let transport = MockTransport::new().always_fail();
        let backend = RecordingBackend::new();
        let (state, rx) = watch::channel(ConnectionState::Disconnected);
        let started = Instant::now();

        let err = manager(&transport, &backend, ConnectionConfig::default())
            .establish(&device(), &state, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LifecycleError::AttemptsExhausted {
                address: ADDRESS.to_string(),
                attempts: 3
            }
        );
        assert_eq!(transport.connect_attempts(), 3);
        // two retry delays, none after the last attempt
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(*rx.borrow(), ConnectionState::Failed);

        let alerts = backend.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::ConnectionFailure);
        assert_eq!(
            alerts[0].text,
            "Failed to connect to device C4:7C:8D:6A:1B:22 after 3 attempts."
        );
        assert_eq!(alerts[0].gateway_address, "B8:27:EB:00:00:01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_stream() {
        let transport = acking(MockTransport::new().fail_connects(1));
        let backend = RecordingBackend::new();
        let (state, rx) = watch::channel(ConnectionState::Disconnected);
        let started = Instant::now();

        let connected = manager(&transport, &backend, ConnectionConfig::default())
            .establish(&device(), &state, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(connected.attempt, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(*rx.borrow(), ConnectionState::Streaming);
        assert_eq!(
            transport.writes(),
            vec![ENABLE_SENSORS_COMMAND, MASTER_SWITCH_COMMAND, SET_INTERVAL_COMMAND]
        );
        assert!(backend.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_handshakes_do_not_abort() {
        let transport = MockTransport::new();
        let backend = RecordingBackend::new();
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);

        let connected = manager(&transport, &backend, ConnectionConfig::default())
            .establish(&device(), &state, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(connected.attempt, 1);
        assert_eq!(transport.writes_of(ENABLE_SENSORS_COMMAND), 10);
        assert_eq!(transport.writes_of(MASTER_SWITCH_COMMAND), 10);
        assert_eq!(transport.writes_of(SET_INTERVAL_COMMAND), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_reporting_down_counts_as_failure() {
        let transport = MockTransport::new().report_disconnected();
        let backend = RecordingBackend::new();
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);

        let result = manager(&transport, &backend, ConnectionConfig::default())
            .establish(&device(), &state, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LifecycleError::AttemptsExhausted { .. })));
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(transport.disconnects(), 3);
        assert!(transport.writes().is_empty());
        assert_eq!(backend.alerts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_handshake_closes_link() {
        let transport = MockTransport::new();
        transport.fail_writes();
        let backend = RecordingBackend::new();
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);

        let result = manager(&transport, &backend, ConnectionConfig::default())
            .establish(&device(), &state, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LifecycleError::AttemptsExhausted { .. })));
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(transport.disconnects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_runs_before_handshakes() {
        let transport = acking(MockTransport::new()).reply(BIND_REQUEST, &["DA8102000001EF5C"]);
        let backend = RecordingBackend::new();
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        let connection = ConnectionConfig {
            bind_on_connect: true,
            ..ConnectionConfig::default()
        };

        manager(&transport, &backend, connection)
            .establish(&device(), &state, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.writes()[0], BIND_REQUEST);
        assert_eq!(transport.writes().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_alert() {
        let transport = MockTransport::new().always_fail();
        let backend = RecordingBackend::new();
        let (state, rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let manager = manager(&transport, &backend, ConnectionConfig::default());
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            stopper.cancel();
        });

        let err = manager.establish(&device(), &state, &cancel).await.unwrap_err();

        assert_eq!(err, LifecycleError::Cancelled);
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
        assert!(backend.alerts().is_empty());
    }
}
