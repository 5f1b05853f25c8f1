//! Core event types shared across the alerting pipeline.
//!
//! A `DetectionEvent` is produced once per processed frame by the external
//! capture/inference loop and consumed by the alert service. `SyncPayload` is
//! the durable, transport-agnostic record derived from a single detection;
//! its JSON shape is a compatibility contract with the dashboard.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One recognized object in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Model class index
    pub class_id: u32,
    /// Human-readable class name (e.g. "leopard")
    pub class_name: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Bounding box as (x1, y1, x2, y2) with x1 < x2, y1 < y2
    pub bbox: [i32; 4],
    /// Unix timestamp (seconds) when the object was detected
    pub detected_at: f64,
}

/// Raw RGB24 frame buffer handed in by the capture pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB pixel data, `width * height * 3` bytes
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

/// One processed frame with zero or more detections.
///
/// Owned exclusively by the alert service for the duration of one
/// `handle_detection` call; derived payloads may outlive it.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    /// The frame the detections were found in
    pub frame: Frame,
    /// Detections in model output order (may be empty)
    pub detections: Vec<Detection>,
    /// Inference time for this frame in milliseconds
    pub processing_time_ms: f64,
    /// Unix timestamp (seconds) when the frame was captured
    pub captured_at: f64,
}

/// Priority tier of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Tracked species requiring an immediate delivery attempt
    High,
    /// Everything else, delivered via the offline queue
    Normal,
}

impl Priority {
    /// Numeric priority carried on the wire and used for queue ordering
    pub fn value(&self) -> u8 {
        match self {
            Priority::High => 5,
            Priority::Normal => 0,
        }
    }

    /// Label used in payload metadata
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Priority::High)
    }
}

/// Structured metadata attached to every sync payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadMetadata {
    /// Inference time for the source frame in milliseconds
    pub processing_time_ms: f64,
    /// Priority label ("high" or "normal")
    pub priority: String,
    /// Unix timestamp of the source frame
    pub frame_timestamp: f64,
    /// Coarse species category ("wild_cat" or "other")
    pub animal_category: String,
}

/// The durable record of a detection destined for the remote dashboard.
///
/// Field names and types are a wire contract; changing them breaks the
/// dashboard ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncPayload {
    /// Local monotonic sequence number (not globally unique)
    pub detection_id: u64,
    /// Originating device id
    pub device_id: String,
    /// Unique id for this detection, used as the queue dedup key
    pub event_id: String,
    /// Originating camera id
    pub camera_id: String,
    /// Unix timestamp (seconds) of the detection
    pub timestamp: f64,
    /// Detected class name
    pub class_name: String,
    /// Detected class index
    pub class_id: u32,
    /// Detection confidence
    pub confidence: f32,
    /// Bounding box as [x1, y1, x2, y2]
    pub bbox: [i32; 4],
    /// Budget-compressed JPEG, base64-encoded; absent when encoding failed
    /// or image inclusion is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    /// Numeric priority, higher = more urgent
    pub priority: u8,
    /// Structured metadata
    pub metadata: PayloadMetadata,
}

/// Current time as fractional unix seconds.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
