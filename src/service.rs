//! Alert service: the entry point invoked once per detection event.
//!
//! Composes the classifier, the local alert sink, the image encoder, the
//! offline queue and the dashboard transport. `handle_detection` never fails
//! outward; every downstream failure is absorbed into logs and counters so
//! the detection loop keeps making progress even when every sink is down.

use crate::classifier::AlertClassifier;
use crate::config::Config;
use crate::detection::{unix_now, Detection, DetectionEvent, PayloadMetadata, Priority, SyncPayload};
use crate::image_encoder::encode_to_budget;
use crate::local_alert::LocalAlertSink;
use crate::queue::DeliveryQueue;
use crate::transport::DashboardTransport;
use crate::worker::DeliveryStats;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How detections reach the dashboard, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// High priority attempts an immediate send and falls back to the
    /// queue; normal priority is always queued
    ImmediateThenQueue,
    /// Everything is queued; no immediate sends (no dashboard URL yet)
    QueueOnly,
    /// Remote delivery is switched off
    Disabled,
}

impl DeliveryStrategy {
    fn from_config(config: &Config) -> Self {
        if !config.alerts.enabled || !config.alerts.remote.enabled {
            DeliveryStrategy::Disabled
        } else if config.dashboard.api_url.is_empty() {
            DeliveryStrategy::QueueOnly
        } else {
            DeliveryStrategy::ImmediateThenQueue
        }
    }
}

/// Observability snapshot returned by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub enabled: bool,
    pub alert_count: u64,
    pub last_alerts: HashMap<String, f64>,
    pub queue_depth: usize,
    pub remote_enabled: bool,
    pub local_available: bool,
    pub delivered: u64,
    pub permanent_failures: u64,
    pub lost_payloads: u64,
}

/// Orchestrates local and remote alerting for detection events.
pub struct AlertService {
    enabled: bool,
    local_enabled: bool,
    include_image: bool,
    image_max_kb: u32,
    request_timeout: Duration,
    device_id: String,
    camera_id: String,
    strategy: DeliveryStrategy,
    classifier: Mutex<AlertClassifier>,
    local_sink: LocalAlertSink,
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn DashboardTransport>,
    delivery_stats: Arc<DeliveryStats>,
    alert_count: AtomicU64,
    lost_payloads: AtomicU64,
}

impl AlertService {
    pub fn new(
        config: &Config,
        local_sink: LocalAlertSink,
        queue: Arc<DeliveryQueue>,
        transport: Arc<dyn DashboardTransport>,
        delivery_stats: Arc<DeliveryStats>,
    ) -> Self {
        let strategy = DeliveryStrategy::from_config(config);
        info!(?strategy, device_id = %config.device.id, "alert service initialized");

        Self {
            enabled: config.alerts.enabled,
            local_enabled: config.alerts.local.gpio_enabled,
            include_image: config.alerts.remote.include_image,
            image_max_kb: config.alerts.remote.image_max_size_kb,
            request_timeout: config.request_timeout(),
            device_id: config.device.id.clone(),
            camera_id: format!("cam-{}-0", config.device.id),
            strategy,
            classifier: Mutex::new(AlertClassifier::new(
                &config.alerts.high_priority_classes,
                config.alerts.cooldown_seconds,
            )),
            local_sink,
            queue,
            transport,
            delivery_stats,
            alert_count: AtomicU64::new(0),
            lost_payloads: AtomicU64::new(0),
        }
    }

    /// Process one detection event: local alerts, payload construction and
    /// remote delivery dispatch for each detection. Never fails outward.
    #[instrument(skip(self, event), fields(detections = event.detections.len()))]
    pub async fn handle_detection(&self, event: DetectionEvent) {
        if !self.enabled || event.detections.is_empty() {
            return;
        }

        for detection in &event.detections {
            self.handle_one(&event, detection).await;
        }
    }

    async fn handle_one(&self, event: &DetectionEvent, detection: &Detection) {
        let now = unix_now();
        let class_name = detection.class_name.as_str();

        // Local alerting and cooldown bookkeeping happen before any network
        // work so a slow dashboard never delays the buzzer.
        let (priority, animal_category) = {
            let mut classifier = self.classifier.lock();
            let priority = classifier.classify(class_name);
            let category = classifier.animal_category(class_name);

            if self.local_enabled && !classifier.should_suppress(class_name, now) {
                self.local_sink.fire(class_name, priority.is_high());
            }
            classifier.record_alert(class_name, now);

            (priority, category)
        };

        let detection_id = self.alert_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("trailwatch_alerts_total").increment(1);

        if self.strategy == DeliveryStrategy::Disabled {
            return;
        }

        let payload = self.build_payload(event, detection, detection_id, priority, animal_category);

        match self.strategy {
            DeliveryStrategy::ImmediateThenQueue if priority.is_high() => {
                let outcome = tokio::time::timeout(
                    self.request_timeout,
                    self.transport.send_immediate(payload.clone()),
                )
                .await;

                match outcome {
                    Ok(Ok(())) => {
                        self.delivery_stats.record_delivered();
                        metrics::counter!("trailwatch_delivered_total").increment(1);
                        info!(class_name, confidence = detection.confidence, "high-priority alert sent");
                    }
                    Ok(Err(e)) => {
                        warn!(class_name, error = %e, "immediate send failed, queueing");
                        self.enqueue_payload(payload, now);
                    }
                    Err(_) => {
                        warn!(class_name, "immediate send timed out, queueing");
                        self.enqueue_payload(payload, now);
                    }
                }
            }
            _ => {
                self.enqueue_payload(payload, now);
                debug!(class_name, "alert queued");
            }
        }
    }

    fn build_payload(
        &self,
        event: &DetectionEvent,
        detection: &Detection,
        detection_id: u64,
        priority: Priority,
        animal_category: &str,
    ) -> SyncPayload {
        let image_base64 = if self.include_image {
            match encode_to_budget(&event.frame, self.image_max_kb) {
                Ok(bytes) => Some(BASE64.encode(bytes)),
                Err(e) => {
                    // Degrade to a payload without an image; the detection
                    // metadata still gets delivered.
                    warn!(error = %e, "image compression failed");
                    None
                }
            }
        } else {
            None
        };

        SyncPayload {
            detection_id,
            device_id: self.device_id.clone(),
            event_id: Uuid::new_v4().to_string(),
            camera_id: self.camera_id.clone(),
            timestamp: detection.detected_at,
            class_name: detection.class_name.clone(),
            class_id: detection.class_id,
            confidence: detection.confidence,
            bbox: detection.bbox,
            image_base64,
            priority: priority.value(),
            metadata: PayloadMetadata {
                processing_time_ms: event.processing_time_ms,
                priority: priority.label().to_string(),
                frame_timestamp: event.captured_at,
                animal_category: animal_category.to_string(),
            },
        }
    }

    fn enqueue_payload(&self, payload: SyncPayload, now: f64) {
        if self.queue.enqueue(payload, now).is_err() {
            self.lost_payloads.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("trailwatch_payloads_lost_total").increment(1);
            warn!("offline queue full, payload dropped");
        }
    }

    /// Snapshot of alerting and delivery statistics.
    pub fn get_stats(&self) -> AlertStats {
        AlertStats {
            enabled: self.enabled,
            alert_count: self.alert_count.load(Ordering::Relaxed),
            last_alerts: self.classifier.lock().last_alerts(),
            queue_depth: self.queue.len(),
            remote_enabled: self.strategy != DeliveryStrategy::Disabled,
            local_available: self.local_sink.is_available(),
            delivered: self.delivery_stats.delivered(),
            permanent_failures: self.delivery_stats.permanent_failures(),
            lost_payloads: self.lost_payloads.load(Ordering::Relaxed),
        }
    }
}
