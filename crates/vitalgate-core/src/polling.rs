//! Telemetry polling.
//!
//! Once a device is streaming, two things happen concurrently until the link
//! drops or the session is cancelled:
//!
//! - a request schedule writes the vitals request, waits, writes the battery
//!   request, waits for the next cycle, forever
//! - every notification is decoded: battery frames update the last known
//!   level, vitals frames are merged with it, classified and uploaded
//!
//! Uploads run in order on their own future beside the loop, so a slow backend
//! never delays a request or a cancellation. Alerts are derived from each
//! sample after the backend accepted it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::alerts::derive_alerts;
use crate::backend::{Backend, VitalsPayload};
use crate::classifier::WearClassifier;
use crate::codec::{decode_frame, encode_hex, Telemetry};
use crate::config::{AlertsConfig, GatewayConfig};
use crate::handshake::command_bytes;
use crate::identity::GatewayId;
use crate::transport::{Characteristics, Link, TransportError};
use crate::types::VitalsSample;

/// Requests a vitals frame.
pub const VITALS_REQUEST: &str = "DA0D0000AADB";

/// Requests a battery frame.
pub const BATTERY_REQUEST: &str = "DA060000DB19";

/// Why a polling loop stopped without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// The session's cancellation token fired.
    Cancelled,
    /// The notification stream ended.
    Disconnected,
}

/// Polling state for one streaming device.
#[derive(Debug)]
pub struct PollingLoop<B> {
    uploader: Arc<Uploader<B>>,
    device_address: String,
    battery_delay: Duration,
    cycle_interval: Duration,
    classifier: WearClassifier,
    last_battery: Option<u32>,
}

#[derive(Debug)]
struct Uploader<B> {
    backend: B,
    device_address: String,
    gateway: GatewayId,
    device_id: u32,
    thresholds: AlertsConfig,
}

impl<B: Backend> PollingLoop<B> {
    /// Create a loop for `device_address` with fresh classifier state.
    pub fn new(
        backend: B,
        device_address: impl Into<String>,
        gateway: GatewayId,
        config: &GatewayConfig,
    ) -> Self {
        let device_address = device_address.into();
        Self {
            uploader: Arc::new(Uploader {
                backend,
                device_address: device_address.clone(),
                gateway,
                device_id: config.backend.device_id,
                thresholds: config.alerts.clone(),
            }),
            device_address,
            battery_delay: config.polling.battery_delay(),
            cycle_interval: config.polling.cycle_interval(),
            classifier: WearClassifier::new(config.polling.unworn_threshold),
            last_battery: None,
        }
    }

    /// Last battery level seen, if any.
    #[must_use]
    pub const fn last_battery(&self) -> Option<u32> {
        self.last_battery
    }

    /// Poll until cancelled or disconnected.
    ///
    /// Uploads still queued when the loop ends are dropped.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] of a failed subscription or request write.
    pub async fn run<L: Link>(
        &mut self,
        link: &L,
        chars: Characteristics,
        cancel: &CancellationToken,
    ) -> Result<PollExit, TransportError> {
        let mut notifications = link.subscribe(chars.notify).await?;
        let requests = request_schedule(
            link,
            chars,
            self.battery_delay,
            self.cycle_interval,
        );
        tokio::pin!(requests);

        let (queue, pending) = mpsc::unbounded_channel();
        let uploads = Arc::clone(&self.uploader).drain(pending);
        tokio::pin!(uploads);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(address = %self.device_address, "Polling cancelled");
                    return Ok(PollExit::Cancelled);
                }
                err = &mut requests => return Err(err),
                () = &mut uploads => {}
                frame = notifications.next() => {
                    let Some(bytes) = frame else {
                        info!(address = %self.device_address, "Notification stream closed");
                        return Ok(PollExit::Disconnected);
                    };
                    if let Some(sample) = self.handle_frame(&encode_hex(&bytes)) {
                        if queue.send(sample).is_err() {
                            warn!(address = %self.device_address, "Upload queue closed");
                        }
                    }
                }
            }
        }
    }

    /// Decode one notification. Returns a classified sample for vitals frames.
    pub fn handle_frame(&mut self, hex: &str) -> Option<VitalsSample> {
        match decode_frame(hex) {
            Ok(Telemetry::Battery(reading)) => {
                debug!(address = %self.device_address, level = reading.battery_level, "Battery level");
                self.last_battery = Some(reading.battery_level);
                None
            }
            Ok(Telemetry::Vitals(sample)) => {
                Some(self.classifier.classify(sample.with_battery(self.last_battery)))
            }
            Err(e) if e.is_expected() => {
                trace!(frame = hex, "Watch still measuring");
                None
            }
            Err(e) => {
                warn!(address = %self.device_address, frame = hex, error = %e, "Dropping frame");
                None
            }
        }
    }
}

impl<B: Backend> Uploader<B> {
    /// Upload queued samples one at a time. Never completes.
    async fn drain(self: Arc<Self>, mut pending: mpsc::UnboundedReceiver<VitalsSample>) {
        while let Some(sample) = pending.recv().await {
            self.forward(&sample).await;
        }
        std::future::pending::<()>().await;
    }

    async fn forward(&self, sample: &VitalsSample) {
        let payload = VitalsPayload::new(
            sample,
            &self.device_address,
            self.gateway.as_str(),
            self.device_id,
            Utc::now(),
        );
        if let Err(e) = self.backend.send_vitals(&payload).await {
            warn!(address = %self.device_address, error = %e, "Dropping vitals sample");
            return;
        }
        info!(
            address = %self.device_address,
            heart_rate = sample.heart_rate,
            blood_pressure = %sample.blood_pressure,
            spo2 = sample.blood_oxygen,
            battery = ?sample.battery_level,
            "Vitals uploaded"
        );

        let alerts = derive_alerts(
            sample,
            &self.device_address,
            self.gateway.as_str(),
            &self.thresholds,
        );
        for alert in alerts {
            if let Err(e) = self.backend.send_alert(&alert).await {
                warn!(address = %self.device_address, error = %e, text = %alert.text, "Failed to send alert");
            }
        }
    }
}

/// Write the vitals and battery requests on a fixed cycle. Only returns on a
/// write error.
async fn request_schedule<L: Link>(
    link: &L,
    chars: Characteristics,
    battery_delay: Duration,
    cycle_interval: Duration,
) -> TransportError {
    let (vitals, battery) = match (
        command_bytes(VITALS_REQUEST, chars),
        command_bytes(BATTERY_REQUEST, chars),
    ) {
        (Ok(vitals), Ok(battery)) => (vitals, battery),
        (Err(e), _) | (_, Err(e)) => return e,
    };

    loop {
        if let Err(e) = write(link, chars.write, &vitals).await {
            return e;
        }
        tokio::time::sleep(battery_delay).await;
        if let Err(e) = write(link, chars.write, &battery).await {
            return e;
        }
        tokio::time::sleep(cycle_interval).await;
    }
}

async fn write<L: Link>(link: &L, characteristic: Uuid, bytes: &[u8]) -> Result<(), TransportError> {
    trace!(request = %encode_hex(bytes), "Polling request");
    link.write(characteristic, bytes).await
}
