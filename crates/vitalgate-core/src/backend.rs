//! Backend ingestion client.
//!
//! Vitals samples and alerts are POSTed as JSON to two fixed endpoints. A
//! request counts as delivered on `200 OK` or `201 Created`; anything else is
//! reported as [`BackendError::Status`]. Failed uploads are not retried.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

use crate::config::BackendConfig;
use crate::types::{AlertEvent, VitalsSample};

/// Backend delivery failures.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request could not be sent or timed out.
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend at {url} responded with status {status}")]
    Status {
        /// Endpoint that was called.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// An endpoint URL could not be parsed.
    #[error("Invalid backend URL '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        message: String,
    },
}

/// JSON body of a vitals upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VitalsPayload {
    /// Beats per minute.
    pub heart_rate: u32,
    /// `"systolic/diastolic"`.
    #[schema(example = "120/80")]
    pub blood_pressure: String,
    /// Blood oxygen saturation.
    pub spo2: u32,
    /// Configured device identifier.
    pub device_id: u32,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Watch address.
    pub smartwatch_mac_address: String,
    /// Gateway address.
    pub fbd_mac_address: String,
    /// Last known battery level, 0 if none was seen yet.
    pub watch_battery: u32,
    /// Blood glucose, device units.
    pub blood_glucose: u32,
    /// `"Worn"`, `"Not Worn"` or empty.
    pub watch_status: String,
}

impl VitalsPayload {
    /// Build the upload body for `sample`.
    #[must_use]
    pub fn new(
        sample: &VitalsSample,
        device_address: &str,
        gateway_address: &str,
        device_id: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            heart_rate: sample.heart_rate,
            blood_pressure: sample.blood_pressure.to_string(),
            spo2: sample.blood_oxygen,
            device_id,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            smartwatch_mac_address: device_address.to_string(),
            fbd_mac_address: gateway_address.to_string(),
            watch_battery: sample.battery_level.unwrap_or(0),
            blood_glucose: sample.blood_glucose,
            watch_status: sample
                .wear_status
                .map(|status| status.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Where samples and alerts are delivered.
pub trait Backend: Send + Sync {
    /// Upload one vitals sample.
    fn send_vitals(
        &self,
        payload: &VitalsPayload,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Upload one alert.
    fn send_alert(&self, alert: &AlertEvent)
        -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// `reqwest` client for the ingestion API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    vitals_url: Url,
    alerts_url: Url,
}

impl HttpBackend {
    /// Build a client for the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL does not parse or the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|e| BackendError::InvalidUrl {
                url: raw.to_string(),
                message: e.to_string(),
            })
        };
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            vitals_url: parse(&config.vitals_url)?,
            alerts_url: parse(&config.alerts_url)?,
        })
    }

    async fn post<T: Serialize + Sync>(&self, url: &Url, body: &T) -> Result<(), BackendError> {
        let resp = self.client.post(url.clone()).json(body).send().await?;
        let status = resp.status().as_u16();
        debug!(url = %url, status, "Backend responded");
        if is_success(status) {
            Ok(())
        } else {
            Err(BackendError::Status {
                url: url.to_string(),
                status,
            })
        }
    }
}

impl Backend for HttpBackend {
    async fn send_vitals(&self, payload: &VitalsPayload) -> Result<(), BackendError> {
        self.post(&self.vitals_url, payload).await
    }

    async fn send_alert(&self, alert: &AlertEvent) -> Result<(), BackendError> {
        self.post(&self.alerts_url, alert).await
    }
}

const fn is_success(status: u16) -> bool {
    matches!(status, 200 | 201)
}
