//! Health alert derivation.
//!
//! Alerts are re-evaluated after every successful vitals upload and are not
//! debounced: a condition that persists raises an alert every polling cycle.

use crate::config::AlertsConfig;
use crate::types::{AlertCategory, AlertEvent, VitalsSample};

/// Alerts raised by one sample. Heart rate and battery are independent.
#[must_use]
pub fn derive_alerts(
    sample: &VitalsSample,
    device_address: &str,
    gateway_address: &str,
    thresholds: &AlertsConfig,
) -> Vec<AlertEvent> {
    let mut alerts = Vec::new();
    let alert = |category, text| AlertEvent {
        category,
        text,
        device_address: device_address.to_string(),
        gateway_address: gateway_address.to_string(),
    };

    let heart_rate = sample.heart_rate;
    if heart_rate > thresholds.heart_rate_high {
        alerts.push(alert(
            AlertCategory::HeartRate,
            format!("Heart rate is too high: {heart_rate}"),
        ));
    } else if heart_rate < thresholds.heart_rate_low {
        alerts.push(alert(
            AlertCategory::HeartRate,
            format!("Heart rate is too low: {heart_rate}"),
        ));
    }

    if let Some(level) = sample.battery_level {
        if level < thresholds.battery_low {
            alerts.push(alert(
                AlertCategory::BatteryLevel,
                format!("Battery level is low: {level}%"),
            ));
        }
    }

    alerts
}
