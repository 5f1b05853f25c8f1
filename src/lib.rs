//! Trailwatch Edge Agent
//!
//! Turns wildlife-camera detections into reliably-delivered events for a
//! remote dashboard, under intermittent connectivity, bounded local storage
//! and bandwidth constraints. The capture/inference loop (out of scope here)
//! calls [`AlertService::handle_detection`] once per processed frame; the
//! agent classifies urgency, drives the local buzzer, and synchronizes a
//! size-bounded payload to the dashboard.
//!
//! ## Features
//!
//! - **Priority classification**: tracked wild-cat species trigger an
//!   immediate delivery attempt; everything else is batched through the
//!   offline queue
//! - **Offline durability**: a bounded, priority-ordered queue persisted via
//!   atomic snapshot writes survives restarts and long network partitions
//! - **Retry with backoff**: a single delivery worker drains the queue with
//!   exponential backoff and hard per-attempt timeouts
//! - **Local alerting**: cooldown-gated GPIO pulse patterns that never block
//!   the detection loop
//! - **Bounded images**: JPEG compression searched down to a configured
//!   size budget before payloads carry a frame
//!
//! ## Architecture
//!
//! ```text
//! Camera/Detector (external)
//!        │ DetectionEvent
//!        ▼
//! ┌──────────────┐     ┌──────────────┐
//! │ Alert        │────▶│ Local Alert  │ (GPIO, best effort)
//! │ Service      │     │ Sink         │
//! └──────────────┘     └──────────────┘
//!        │ SyncPayload
//!        │ high: immediate ──────────────▶ Dashboard
//!        ▼        (fallback)                  ▲
//! ┌──────────────┐      ┌──────────────┐      │
//! │ Delivery     │◀────▶│ Delivery     │──────┘
//! │ Queue (disk) │      │ Worker       │  retry/backoff
//! └──────────────┘      └──────────────┘
//! ```

pub mod classifier;
pub mod config;
pub mod detection;
pub mod image_encoder;
pub mod local_alert;
pub mod queue;
pub mod service;
pub mod transport;
pub mod worker;

pub use classifier::{AlertClassifier, TRACKED_SPECIES};
pub use config::Config;
pub use detection::{Detection, DetectionEvent, Frame, Priority, SyncPayload};
pub use image_encoder::{encode_to_budget, EncodeError};
pub use local_alert::{GpioOutput, LocalAlertSink, SysfsGpio};
pub use queue::{DeliveryQueue, JsonFileStore, MemoryStore, QueueError, QueuedEntry, QueueStore};
pub use service::{AlertService, AlertStats, DeliveryStrategy};
pub use transport::{DashboardTransport, HeartbeatStatus, HttpTransport, TransportError};
pub use worker::{DeliveryStats, DeliveryWorker, WorkerSettings};
