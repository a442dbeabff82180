//! In-memory transport and backend for tests.
//!
//! [`MockTransport`] scripts a watch: connections can be made to fail, and
//! writes of a given command can trigger notification replies. Every link opened
//! from one transport shares the same state, so tests can inspect writes after
//! the code under test has dropped its link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use uuid::Uuid;

use crate::backend::{Backend, BackendError, VitalsPayload};
use crate::codec::{decode_hex, encode_hex};
use crate::transport::{Link, Scanner, Subscription, Transport, TransportError, TransportResult};
use crate::types::{AlertEvent, DeviceHandle};

#[derive(Debug, Clone)]
struct Reply {
    on_nth: u32,
    frames: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    connect_failures: u32,
    always_fail: bool,
    report_disconnected: bool,
    fail_writes: bool,
    connect_attempts: u32,
    disconnects: u32,
    writes: Vec<(Uuid, String)>,
    write_counts: HashMap<String, u32>,
    replies: HashMap<String, Reply>,
    subscribers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
}

impl MockState {
    fn broadcast(&mut self, frame: &[u8]) {
        self.subscribers
            .retain(|tx| tx.unbounded_send(frame.to_vec()).is_ok());
    }
}

/// Scriptable in-memory watch.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A transport whose connections succeed and whose watch never replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Fail the next `n` connection attempts.
    #[must_use]
    pub fn fail_connects(self, n: u32) -> Self {
        self.state().connect_failures = n;
        self
    }

    /// Fail every connection attempt.
    #[must_use]
    pub fn always_fail(self) -> Self {
        self.state().always_fail = true;
        self
    }

    /// Connections open but the link reports itself as down.
    #[must_use]
    pub fn report_disconnected(self) -> Self {
        self.state().report_disconnected = true;
        self
    }

    /// Reply to every write of `command` with `frames`.
    #[must_use]
    pub fn reply(self, command: &str, frames: &[&str]) -> Self {
        self.reply_on_nth(command, 1, frames)
    }

    /// Reply to writes of `command` from the `n`th one onwards.
    #[must_use]
    pub fn reply_on_nth(self, command: &str, n: u32, frames: &[&str]) -> Self {
        self.state().replies.insert(
            command.to_ascii_uppercase(),
            Reply {
                on_nth: n,
                frames: frames.iter().map(|f| (*f).to_string()).collect(),
            },
        );
        self
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self) {
        self.state().fail_writes = true;
    }

    /// Deliver a notification to every open subscription.
    pub fn push_notification(&self, hex: &str) {
        let bytes = decode_hex(hex).unwrap_or_default();
        self.state().broadcast(&bytes);
    }

    /// End every open subscription, as a disconnect would.
    pub fn close_link(&self) {
        self.state().subscribers.clear();
    }

    /// Connection attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// Times `disconnect()` was called on any link.
    #[must_use]
    pub fn disconnects(&self) -> u32 {
        self.state().disconnects
    }

    /// Every write so far as uppercase hex, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.iter().map(|(_, hex)| hex.clone()).collect()
    }

    /// How many times `command` was written.
    #[must_use]
    pub fn writes_of(&self, command: &str) -> u32 {
        self.state()
            .write_counts
            .get(&command.to_ascii_uppercase())
            .copied()
            .unwrap_or(0)
    }

    /// Subscriptions whose receiving end is still alive.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl Transport for MockTransport {
    type Link = MockLink;

    async fn connect(&self, address: &str) -> TransportResult<MockLink> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.always_fail || state.connect_failures > 0 {
            state.connect_failures = state.connect_failures.saturating_sub(1);
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                message: "le-connection-abort-by-local".to_string(),
            });
        }
        Ok(MockLink {
            state: Arc::clone(&self.state),
        })
    }
}

/// A link opened by [`MockTransport`].
#[derive(Debug)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl Link for MockLink {
    async fn is_connected(&self) -> bool {
        !lock(&self.state).report_disconnected
    }

    async fn write(&self, characteristic: Uuid, bytes: &[u8]) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(TransportError::WriteFailed {
                characteristic,
                message: "Not connected".to_string(),
            });
        }

        let hex = encode_hex(bytes);
        state.writes.push((characteristic, hex.clone()));
        let count = {
            let count = state.write_counts.entry(hex.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(reply) = state.replies.get(&hex).cloned() {
            if count >= reply.on_nth {
                for frame in &reply.frames {
                    let bytes = decode_hex(frame).unwrap_or_default();
                    state.broadcast(&bytes);
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, _characteristic: Uuid) -> TransportResult<Subscription> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.state).subscribers.push(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.subscribers.clear();
        Ok(())
    }
}

/// Scanner returning a fixed device list after waiting out the window.
#[derive(Debug, Clone, Default)]
pub struct MockScanner {
    devices: Arc<Mutex<Vec<DeviceHandle>>>,
    fail: Arc<AtomicBool>,
    scans: Arc<Mutex<u32>>,
}

impl MockScanner {
    /// A scanner that always sees `devices`.
    #[must_use]
    pub fn with_devices(devices: Vec<DeviceHandle>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
            ..Self::default()
        }
    }

    /// Make scans fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of scans started.
    #[must_use]
    pub fn scans(&self) -> u32 {
        *lock(&self.scans)
    }
}

impl Scanner for MockScanner {
    async fn scan(&self, window: Duration) -> TransportResult<Vec<DeviceHandle>> {
        *lock(&self.scans) += 1;
        tokio::time::sleep(window).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::ScanFailed("org.bluez.Error.InProgress".to_string()));
        }
        Ok(lock(&self.devices).clone())
    }
}

/// Backend that records everything it is sent.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    vitals: Arc<Mutex<Vec<VitalsPayload>>>,
    alerts: Arc<Mutex<Vec<AlertEvent>>>,
    fail: Arc<AtomicBool>,
    vitals_delay: Arc<Mutex<Duration>>,
}

impl RecordingBackend {
    /// An empty, accepting backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every upload with a 500 (or accept again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Take `delay` to answer each vitals upload.
    pub fn set_vitals_delay(&self, delay: Duration) {
        *lock(&self.vitals_delay) = delay;
    }

    /// Vitals accepted so far.
    #[must_use]
    pub fn vitals(&self) -> Vec<VitalsPayload> {
        lock(&self.vitals).clone()
    }

    /// Alerts accepted so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<AlertEvent> {
        lock(&self.alerts).clone()
    }

    fn check(&self, url: &str) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                url: url.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

impl Backend for RecordingBackend {
    async fn send_vitals(&self, payload: &VitalsPayload) -> Result<(), BackendError> {
        let delay = *lock(&self.vitals_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check("mock://vitals")?;
        lock(&self.vitals).push(payload.clone());
        Ok(())
    }

    async fn send_alert(&self, alert: &AlertEvent) -> Result<(), BackendError> {
        self.check("mock://alerts")?;
        lock(&self.alerts).push(alert.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
