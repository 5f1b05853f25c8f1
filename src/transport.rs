//! Dashboard transport: authenticated HTTP delivery of sync payloads.
//!
//! The rest of the pipeline only depends on the two-outcome contract of
//! `DashboardTransport` (delivered / failed); the reqwest-backed
//! implementation lives behind it so workers and the alert service can be
//! tested against mocks.

use crate::config::DashboardConfig;
use crate::detection::SyncPayload;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during payload delivery
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to create HTTP client: {0}")]
    ClientError(String),

    #[error("Failed to serialize payload: {0}")]
    SerializationError(String),

    #[error("Request failed: {0}")]
    RequestError(String),

    #[error("Dashboard returned status {0}")]
    StatusError(u16),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Periodic liveness report sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatStatus {
    pub device_id: String,
    pub device_name: String,
    pub uptime_seconds: u64,
    pub queue_depth: usize,
    pub timestamp: f64,
}

/// Remote delivery contract consumed by the alert service and the worker.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DashboardTransport: Send + Sync {
    /// Deliver a single payload, waiting for the dashboard's acknowledgment.
    async fn send_immediate(&self, payload: SyncPayload) -> Result<(), TransportError>;

    /// Deliver a batch of payloads, returning one outcome per payload in
    /// input order.
    async fn send_batch(&self, payloads: Vec<SyncPayload>) -> Vec<Result<(), TransportError>>;

    /// Report device liveness.
    async fn heartbeat(&self, status: HeartbeatStatus) -> Result<(), TransportError>;
}

/// reqwest-backed transport with API-key auth and optional HMAC signing.
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    device_id: String,
    device_secret: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &DashboardConfig, device_id: String) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ClientError(e.to_string()))?;

        if config.api_url.is_empty() {
            // Misconfiguration is not fatal here: every send fails as a
            // transient error until the URL is corrected.
            warn!("dashboard api_url is not configured, deliveries will fail");
        }

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            device_id,
            device_secret: config.device_secret.clone(),
            timeout,
        })
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<(), TransportError> {
        let url = format!("{}/{}", self.api_url, path);
        let raw = serde_json::to_vec(body)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .header("X-Device-ID", &self.device_id);

        if let Some(ref secret) = self.device_secret {
            let timestamp = crate::detection::unix_now().trunc() as i64;
            let signature = sign_request(&self.device_id, timestamp, &raw, secret);
            request = request
                .header("X-Timestamp", timestamp.to_string())
                .header("X-Signature", signature);
        }

        let response = request.body(raw).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::RequestError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::StatusError(status.as_u16()));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl DashboardTransport for HttpTransport {
    #[instrument(skip(self, payload), fields(event_id = %payload.event_id, class_name = %payload.class_name))]
    async fn send_immediate(&self, payload: SyncPayload) -> Result<(), TransportError> {
        self.post_json("detections", &payload).await?;
        debug!("payload delivered");
        Ok(())
    }

    #[instrument(skip(self, payloads), fields(count = payloads.len()))]
    async fn send_batch(&self, payloads: Vec<SyncPayload>) -> Vec<Result<(), TransportError>> {
        // The batch endpoint acknowledges the whole request; a transport
        // failure therefore applies to every payload in it.
        let count = payloads.len();
        match self.post_json("detections/batch", &payloads).await {
            Ok(()) => (0..count).map(|_| Ok(())).collect(),
            Err(e) => {
                let message = e.to_string();
                (0..count)
                    .map(|_| Err(TransportError::RequestError(message.clone())))
                    .collect()
            }
        }
    }

    async fn heartbeat(&self, status: HeartbeatStatus) -> Result<(), TransportError> {
        self.post_json("heartbeat", &status).await
    }
}

/// HMAC-SHA256 signature over `device_id:timestamp:payload`, hex-encoded.
fn sign_request(device_id: &str, timestamp: i64, body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(device_id.as_bytes());
    mac.update(b":");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b":");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
