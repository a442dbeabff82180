//! Device discovery and the session registry.
//!
//! The [`DiscoveryDriver`] scans, keeps devices whose advertised name starts
//! with the configured prefix, and starts one session per new address. The
//! [`SessionRegistry`] is what makes an address "not new": it is claimed when
//! a session starts and released when the session's [`SessionGuard`] drops.
//!
//! The registry is the only structure shared between tasks. It also keeps the
//! live [`ConnectionState`] of every session for the status API, and can cancel
//! a single session by address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::backend::Backend;
use crate::config::BluetoothConfig;
use crate::error::GatewayError;
use crate::session::SessionFactory;
use crate::transport::{Scanner, Transport, TransportResult};
use crate::types::{ConnectionState, DeviceHandle};

/// Snapshot of one running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    /// Device address.
    #[schema(example = "C4:7C:8D:6A:1B:22")]
    pub address: String,
    /// Advertised name.
    #[schema(example = "GTS-2041")]
    pub name: String,
    /// Current connection state.
    pub state: ConnectionState,
    /// When the session was claimed.
    pub started_at_utc: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionEntry {
    name: String,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    root: CancellationToken,
}

/// Addresses with a running session.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// A registry whose session tokens are children of `root`.
    #[must_use]
    pub fn new(root: CancellationToken) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                root,
            }),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Claim `device` for a new session, or `None` if one is already running.
    #[must_use]
    pub fn claim(&self, device: &DeviceHandle) -> Option<SessionGuard> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&device.address) {
            return None;
        }

        let (state, receiver) = watch::channel(ConnectionState::Disconnected);
        let cancel = self.inner.root.child_token();
        sessions.insert(
            device.address.clone(),
            SessionEntry {
                name: device.name.clone(),
                state: receiver,
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );
        drop(sessions);

        debug!(address = %device.address, "Session claimed");
        Some(SessionGuard {
            registry: self.clone(),
            address: device.address.clone(),
            state,
            cancel,
        })
    }

    /// Whether a session is running for `address`.
    #[must_use]
    pub fn is_active(&self, address: &str) -> bool {
        self.sessions().contains_key(address)
    }

    /// Current state of the session for `address`.
    #[must_use]
    pub fn state(&self, address: &str) -> Option<ConnectionState> {
        self.sessions().get(address).map(|entry| *entry.state.borrow())
    }

    /// Cancel the session for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionNotFound`] if no session is running.
    pub fn cancel(&self, address: &str) -> Result<(), GatewayError> {
        let sessions = self.sessions();
        let entry = sessions
            .get(address)
            .ok_or_else(|| GatewayError::SessionNotFound(address.to_string()))?;
        entry.cancel.cancel();
        info!(address, "Session cancellation requested");
        Ok(())
    }

    /// Every running session, ordered by address.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions()
            .iter()
            .map(|(address, entry)| SessionInfo {
                address: address.clone(),
                name: entry.name.clone(),
                state: *entry.state.borrow(),
                started_at_utc: entry.started_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.address.cmp(&b.address));
        sessions
    }

    /// Number of running sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Whether no session is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, address: &str) {
        self.sessions().remove(address);
        debug!(address, "Session released");
    }
}

/// A claim on one address. Dropping it releases the address.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    address: String,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl SessionGuard {
    /// Claimed address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Publisher for this session's connection state.
    #[must_use]
    pub const fn state(&self) -> &watch::Sender<ConnectionState> {
        &self.state
    }

    /// Fires when this session, or the whole gateway, is cancelled.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.address);
    }
}

/// Scans for devices and starts sessions for new ones.
pub struct DiscoveryDriver<S, T, B> {
    scanner: S,
    sessions: SessionFactory<T, B>,
    registry: SessionRegistry,
    name_prefix: String,
    scan_window: Duration,
    scan_interval: Duration,
    tracker: TaskTracker,
}

impl<S, T, B> DiscoveryDriver<S, T, B>
where
    S: Scanner,
    T: Transport + Clone + 'static,
    B: Backend + Clone + 'static,
{
    /// Create a driver.
    pub fn new(
        scanner: S,
        sessions: SessionFactory<T, B>,
        registry: SessionRegistry,
        bluetooth: &BluetoothConfig,
    ) -> Self {
        Self {
            scanner,
            sessions,
            registry,
            name_prefix: bluetooth.name_prefix.clone(),
            scan_window: bluetooth.scan_window(),
            scan_interval: bluetooth.scan_interval(),
            tracker: TaskTracker::new(),
        }
    }

    /// Tracker for the spawned session tasks.
    #[must_use]
    pub const fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Scan once and start a session for every new matching device.
    ///
    /// Returns the number of sessions started.
    ///
    /// # Errors
    ///
    /// Returns the scanner's error.
    pub async fn scan_once(&self) -> TransportResult<usize> {
        let devices = self.scanner.scan(self.scan_window).await?;
        debug!(found = devices.len(), "Scan finished");

        let mut started = 0;
        for device in devices {
            if !device.name.starts_with(&self.name_prefix) {
                continue;
            }
            let Some(guard) = self.registry.claim(&device) else {
                debug!(address = %device.address, "Session already running");
                continue;
            };

            info!(address = %device.address, name = %device.name, "Starting session");
            let sessions = self.sessions.clone();
            self.tracker.spawn(async move {
                if let Err(e) = sessions.run(device, guard).await {
                    if e.is_expected_state() {
                        debug!(error = %e, "Session stopped");
                    } else {
                        error!(error = %e, "Session failed");
                    }
                }
            });
            started += 1;
        }
        Ok(started)
    }

    /// Scan until `cancel` fires, then wait for every session to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            prefix = %self.name_prefix,
            window_secs = self.scan_window.as_secs(),
            interval_secs = self.scan_interval.as_secs(),
            "Discovery started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.scan_once() => match result {
                    Ok(started) if started > 0 => info!(started, active = self.registry.len(), "New sessions"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Scan failed"),
                },
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.scan_interval) => {}
            }
        }

        self.tracker.close();
        info!(sessions = self.tracker.len(), "Discovery stopped, waiting for sessions");
        self.tracker.wait().await;
    }
}
