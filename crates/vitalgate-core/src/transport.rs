//! Bluetooth LE transport abstraction.
//!
//! The protocol engine talks to watches through three small traits:
//!
//! - [`Scanner`] - find advertising devices during an observation window
//! - [`Transport`] - open a [`Link`] to a device by address
//! - [`Link`] - write to a characteristic and subscribe to notifications
//!
//! A [`Subscription`] is a stream of raw notification payloads. Dropping it
//! unsubscribes, so a listener can never outlive the code that registered it.
//!
//! The BlueZ implementation lives in [`bluez`] (feature `bluetooth`). Tests use
//! the in-memory transport in [`crate::mock`].

use std::future::Future;
use std::time::Duration;

use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::types::DeviceHandle;

#[cfg(feature = "bluetooth")]
pub mod bluez;

/// Nordic UART RX characteristic; commands are written here.
pub const DEFAULT_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9d);

/// Nordic UART TX characteristic; the watch notifies here.
pub const DEFAULT_NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9d);

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Stream of notification payloads. Drop to unsubscribe.
pub type Subscription = BoxStream<'static, Vec<u8>>;

/// Bluetooth link failures.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The address could not be parsed.
    #[error("Invalid Bluetooth address: '{0}'")]
    InvalidAddress(String),

    /// Opening the link failed.
    #[error("Failed to connect to {address}: {message}")]
    ConnectFailed {
        /// Device address.
        address: String,
        /// Underlying error.
        message: String,
    },

    /// The device does not expose a required characteristic.
    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    /// A characteristic write failed.
    #[error("Write to {characteristic} failed: {message}")]
    WriteFailed {
        /// Target characteristic.
        characteristic: Uuid,
        /// Underlying error.
        message: String,
    },

    /// Notifications could not be enabled.
    #[error("Subscribe to {characteristic} failed: {message}")]
    SubscribeFailed {
        /// Target characteristic.
        characteristic: Uuid,
        /// Underlying error.
        message: String,
    },

    /// Device discovery failed.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    /// An operation did not finish in time.
    #[error("Bluetooth operation timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The link went away.
    #[error("Device disconnected")]
    Disconnected,
}

/// The pair of characteristics the watch protocol runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristics {
    /// Commands are written here.
    pub write: Uuid,
    /// Responses and telemetry arrive here.
    pub notify: Uuid,
}

impl Default for Characteristics {
    fn default() -> Self {
        Self {
            write: DEFAULT_WRITE_CHARACTERISTIC,
            notify: DEFAULT_NOTIFY_CHARACTERISTIC,
        }
    }
}

impl From<&crate::config::BluetoothConfig> for Characteristics {
    fn from(config: &crate::config::BluetoothConfig) -> Self {
        Self {
            write: config.write_characteristic,
            notify: config.notify_characteristic,
        }
    }
}

/// An open connection to one device.
pub trait Link: Send + Sync {
    /// Whether the underlying connection is up.
    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    /// Write `bytes` to `characteristic`.
    fn write(
        &self,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Start receiving notifications from `characteristic`.
    fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> impl Future<Output = TransportResult<Subscription>> + Send;

    /// Close the connection.
    fn disconnect(&self) -> impl Future<Output = TransportResult<()>> + Send;
}

/// Opens links to devices.
pub trait Transport: Send + Sync {
    /// Link type produced by this transport.
    type Link: Link + 'static;

    /// Connect to the device at `address`.
    fn connect(&self, address: &str) -> impl Future<Output = TransportResult<Self::Link>> + Send;
}

/// Finds advertising devices.
pub trait Scanner: Send + Sync {
    /// Listen for `window` and return every named device seen.
    fn scan(
        &self,
        window: Duration,
    ) -> impl Future<Output = TransportResult<Vec<DeviceHandle>>> + Send;
}
