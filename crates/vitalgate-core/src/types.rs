//! Shared types and OpenAPI schemas.
//!
//! This module contains the domain types that flow between the protocol engine,
//! the backend client and the local status API.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// A wearable found during discovery.
///
/// The address is the device's identity; the name is whatever it advertised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct DeviceHandle {
    /// Bluetooth MAC address.
    #[schema(example = "C4:7C:8D:6A:1B:22")]
    pub address: String,

    /// Advertised device name.
    #[schema(example = "GTS-2041")]
    pub name: String,
}

impl DeviceHandle {
    /// Create a handle from an address and advertised name.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Systolic/diastolic blood pressure pair in mmHg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BloodPressure {
    /// Systolic pressure.
    pub systolic: u32,
    /// Diastolic pressure.
    pub diastolic: u32,
}

impl fmt::Display for BloodPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.systolic, self.diastolic)
    }
}

/// Whether the watch appears to be on a wrist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum WearStatus {
    /// Readings are changing between samples.
    #[serde(rename = "Worn")]
    Worn,
    /// Readings have stayed identical for too many samples.
    #[serde(rename = "Not Worn")]
    NotWorn,
}

impl WearStatus {
    /// Wire label used by the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Worn => "Worn",
            Self::NotWorn => "Not Worn",
        }
    }
}

impl fmt::Display for WearStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded vitals reading, optionally merged with the last battery level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VitalsSample {
    /// Heart rate in beats per minute.
    pub heart_rate: u32,
    /// Blood pressure.
    pub blood_pressure: BloodPressure,
    /// Blood oxygen saturation in percent.
    pub blood_oxygen: u32,
    /// Blood glucose, device units.
    pub blood_glucose: u32,
    /// Battery level carried over from the latest battery frame.
    pub battery_level: Option<u32>,
    /// Worn/not-worn tag assigned by the classifier.
    pub wear_status: Option<WearStatus>,
}

impl VitalsSample {
    /// Attach the most recently seen battery level.
    #[must_use]
    pub const fn with_battery(mut self, battery_level: Option<u32>) -> Self {
        self.battery_level = battery_level;
        self
    }

    /// Whether heart rate, blood pressure and blood oxygen all match `other`.
    #[must_use]
    pub fn same_vitals(&self, other: &Self) -> bool {
        self.heart_rate == other.heart_rate
            && self.blood_pressure == other.blood_pressure
            && self.blood_oxygen == other.blood_oxygen
    }
}

/// A decoded battery frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatteryReading {
    /// Battery level in percent.
    pub battery_level: u32,
}

/// Connection status of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link open.
    Disconnected,
    /// Opening the link; `attempt` is 1-based.
    Connecting {
        /// Current attempt number.
        attempt: u32,
    },
    /// Link open, configuring the device.
    Handshaking,
    /// Polling telemetry.
    Streaming,
    /// All connection attempts were used up.
    Failed,
}

impl ConnectionState {
    /// Whether the session has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Kind of alert sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// The device could not be connected.
    #[serde(rename = "connection_error")]
    ConnectionFailure,
    /// Heart rate outside the normal band.
    HeartRate,
    /// Battery below the warning threshold.
    BatteryLevel,
}

/// An alert for the backend. Serializes to the ingestion API's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AlertEvent {
    /// Alert kind.
    #[serde(rename = "alert_type")]
    pub category: AlertCategory,

    /// Human readable description.
    #[serde(rename = "alert_text")]
    pub text: String,

    /// Address of the watch the alert is about.
    #[serde(rename = "smartwatch_mac_address")]
    pub device_address: String,

    /// MAC address of this gateway.
    #[serde(rename = "fbd_mac_address")]
    pub gateway_address: String,
}

impl AlertEvent {
    /// Alert raised when every connection attempt failed.
    pub fn connection_failure(
        device_address: impl Into<String>,
        gateway_address: impl Into<String>,
        attempts: u32,
    ) -> Self {
        let device_address = device_address.into();
        Self {
            category: AlertCategory::ConnectionFailure,
            text: format!("Failed to connect to device {device_address} after {attempts} attempts."),
            device_address,
            gateway_address: gateway_address.into(),
        }
    }
}
