//! # vitalgate-core
//!
//! Protocol engine for the vitalgate wearable health-monitor gateway.
//!
//! This crate provides:
//! - Frame decoding and checksum validation for the watch's binary protocol
//! - The command/acknowledgement handshakes that switch the watch's sensors on
//! - Connection lifecycle management with bounded retries
//! - The polling loop that requests telemetry and forwards it to the backend
//! - Discovery of new devices and per-device session bookkeeping
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`codec`] - CRC-16 checksum, hex helpers, battery and vitals frame decoding
//! - [`classifier`] - Worn/not-worn heuristic over successive vitals samples
//! - [`handshake`] - Send-command/await-ack exchanges and the bind request
//! - [`lifecycle`] - Per-device connect/retry state machine
//! - [`polling`] - Periodic telemetry requests and notification dispatch
//! - [`session`] - One device's end-to-end session (lifecycle + polling)
//! - [`discovery`] - Scan loop and the registry of active sessions
//! - [`transport`] - Bluetooth LE link abstraction and the BlueZ implementation
//! - [`backend`] - Backend ingestion client and payload types
//! - [`alerts`] - Health alert derivation
//! - [`identity`] - Gateway MAC address lookup
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared domain types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod alerts;
pub mod backend;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod lifecycle;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod polling;
pub mod session;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use backend::{Backend, BackendError, HttpBackend, VitalsPayload};
pub use classifier::WearClassifier;
pub use codec::{DecodeError, Telemetry};
pub use config::{
    is_valid_mac_address, AlertsConfig, BackendConfig, BluetoothConfig, ConfigError,
    ConfigResult, ConnectionConfig, GatewayConfig, GatewaySection, HandshakeConfig,
    PollingConfig, ServerConfig,
};
pub use discovery::{DiscoveryDriver, SessionGuard, SessionInfo, SessionRegistry};
pub use error::{GatewayError, GatewayResult};
pub use handshake::{BindOutcome, Handshake, HandshakeOutcome};
pub use identity::{resolve_gateway_id, GatewayId, UNKNOWN_GATEWAY_ID};
pub use lifecycle::{ConnectedDevice, ConnectionManager, LifecycleError};
pub use polling::{PollExit, PollingLoop};
pub use session::SessionFactory;
#[cfg(feature = "bluetooth")]
pub use transport::bluez::BluezCentral;
pub use transport::{
    Characteristics, Link, Scanner, Subscription, Transport, TransportError, TransportResult,
};
pub use types::{
    AlertCategory, AlertEvent, BatteryReading, BloodPressure, ConnectionState, DeviceHandle,
    HealthResponse, VitalsSample, WearStatus,
};
