//! Durable, bounded, priority-ordered queue of pending sync payloads.
//!
//! The queue is the single shared mutable resource between detection
//! producers and the delivery worker; all access is serialized through one
//! lock. Entries are ordered by (priority desc, enqueued_at asc), so higher
//! priority always dequeues first and each tier drains FIFO. The backing
//! snapshot is rewritten through a temp-file-and-rename so a crash mid-write
//! never corrupts previously persisted entries.

use crate::detection::SyncPayload;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Errors surfaced by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is full and the new entry cannot displace any existing entry")]
    QueueFull,
}

/// Errors from the backing snapshot store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One pending delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedEntry {
    pub payload: SyncPayload,
    /// Unix timestamp when the entry was first enqueued; FIFO key within a
    /// priority tier, preserved across requeues
    pub enqueued_at: f64,
    /// Delivery attempts made so far
    pub attempt_count: u32,
    /// Unix timestamp before which the entry is not ready for delivery
    pub next_retry_at: f64,
}

/// Persistence seam for the queue snapshot.
pub trait QueueStore: Send + Sync {
    fn load(&self) -> Result<Vec<QueuedEntry>, StoreError>;
    fn save(&self, entries: &[QueuedEntry]) -> Result<(), StoreError>;
}

/// File-backed store writing the snapshot as JSON via temp file + rename.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QueueStore for JsonFileStore {
    fn load(&self) -> Result<Vec<QueuedEntry>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, entries: &[QueuedEntry]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Vec<QueuedEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryStore {
    fn load(&self) -> Result<Vec<QueuedEntry>, StoreError> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, entries: &[QueuedEntry]) -> Result<(), StoreError> {
        *self.snapshot.lock() = entries.to_vec();
        Ok(())
    }
}

struct QueueInner {
    /// Sorted by (priority desc, enqueued_at asc)
    entries: Vec<QueuedEntry>,
    /// Every known event_id, including entries currently in flight
    ids: HashSet<String>,
}

impl QueueInner {
    /// Insert preserving (priority desc, enqueued_at asc) order; equal keys
    /// land after existing ones, keeping enqueue order stable.
    fn insert_sorted(&mut self, entry: QueuedEntry) {
        let priority = entry.payload.priority;
        let enqueued_at = entry.enqueued_at;
        let pos = self.entries.partition_point(|e| {
            e.payload.priority > priority
                || (e.payload.priority == priority && e.enqueued_at <= enqueued_at)
        });
        self.entries.insert(pos, entry);
    }

    /// Index of the eviction victim: the oldest entry of the lowest tier.
    /// With the sort order above, the lowest tier is the tail and its oldest
    /// entry is the tier's first element.
    fn victim_index(&self) -> Option<usize> {
        let min_priority = self.entries.last()?.payload.priority;
        Some(
            self.entries
                .partition_point(|e| e.payload.priority > min_priority),
        )
    }
}

/// Bounded, persistent delivery queue shared by producers and the worker.
pub struct DeliveryQueue {
    inner: Mutex<QueueInner>,
    store: Box<dyn QueueStore>,
    max_size: usize,
    wake: Arc<Notify>,
}

impl DeliveryQueue {
    /// Create a queue, restoring any snapshot the store holds.
    pub fn new(max_size: usize, store: Box<dyn QueueStore>) -> Result<Self, StoreError> {
        let mut restored = store.load()?;
        restored.sort_by(|a, b| {
            b.payload
                .priority
                .cmp(&a.payload.priority)
                .then(a.enqueued_at.total_cmp(&b.enqueued_at))
        });

        let ids = restored
            .iter()
            .map(|e| e.payload.event_id.clone())
            .collect();

        if !restored.is_empty() {
            info!(restored = restored.len(), "offline queue restored");
        }

        Ok(Self {
            inner: Mutex::new(QueueInner {
                entries: restored,
                ids,
            }),
            store,
            max_size,
            wake: Arc::new(Notify::new()),
        })
    }

    /// Handle the worker awaits on for new-entry wakeups.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Append a payload for later delivery.
    ///
    /// A duplicate `event_id` is a success no-op, tolerating at-least-once
    /// producers. On overflow the oldest lowest-priority entry is evicted
    /// when the new entry's priority is at least the victim's; otherwise the
    /// new payload is rejected with `QueueFull` and the caller counts the
    /// loss.
    pub fn enqueue(&self, payload: SyncPayload, now: f64) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();

        if inner.ids.contains(&payload.event_id) {
            debug!(event_id = %payload.event_id, "duplicate enqueue ignored");
            return Ok(());
        }

        self.make_room(&mut inner, payload.priority)?;

        inner.ids.insert(payload.event_id.clone());
        inner.insert_sorted(QueuedEntry {
            payload,
            enqueued_at: now,
            attempt_count: 0,
            next_retry_at: now,
        });

        self.persist(&inner);
        drop(inner);
        self.wake.notify_one();
        Ok(())
    }

    /// Take the highest-priority entry whose retry time has arrived.
    ///
    /// The entry leaves the in-memory collection but stays in the persisted
    /// snapshot and the dedup set until `ack` or `requeue`, so a crash while
    /// it is in flight redelivers it on restart.
    pub fn dequeue_ready(&self, now: f64) -> Option<QueuedEntry> {
        let mut inner = self.inner.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.next_retry_at <= now)?;
        Some(inner.entries.remove(idx))
    }

    /// Remove a delivered (or permanently failed) entry. Idempotent.
    pub fn ack(&self, event_id: &str) {
        let mut inner = self.inner.lock();
        let was_known = inner.ids.remove(event_id);
        inner.entries.retain(|e| e.payload.event_id != event_id);
        if was_known {
            self.persist(&inner);
        }
    }

    /// Put a failed entry back with an increased attempt count and a retry
    /// time `backoff` from now. The original enqueue time is kept so the
    /// entry does not jump ahead of its tier.
    ///
    /// If the queue filled up while the entry was in flight, the usual
    /// displacement policy applies; a rejected entry is dropped.
    pub fn requeue(
        &self,
        mut entry: QueuedEntry,
        backoff: Duration,
        now: f64,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();

        entry.attempt_count += 1;
        entry.next_retry_at = now + backoff.as_secs_f64();

        if let Err(e) = self.make_room(&mut inner, entry.payload.priority) {
            inner.ids.remove(&entry.payload.event_id);
            self.persist(&inner);
            return Err(e);
        }

        inner.insert_sorted(entry);
        self.persist(&inner);
        Ok(())
    }

    /// Free one slot for an entry of the given priority, applying the
    /// displacement policy: the oldest lowest-priority entry is evicted when
    /// the incoming priority is at least the victim's.
    fn make_room(&self, inner: &mut QueueInner, priority: u8) -> Result<(), QueueError> {
        if inner.entries.len() < self.max_size {
            return Ok(());
        }

        let victim_idx = match inner.victim_index() {
            Some(idx) if priority >= inner.entries[idx].payload.priority => idx,
            _ => {
                metrics::counter!("trailwatch_queue_rejected_total").increment(1);
                return Err(QueueError::QueueFull);
            }
        };

        let victim = inner.entries.remove(victim_idx);
        inner.ids.remove(&victim.payload.event_id);
        metrics::counter!("trailwatch_queue_evicted_total").increment(1);
        warn!(
            event_id = %victim.payload.event_id,
            class_name = %victim.payload.class_name,
            "queue full, evicted oldest low-priority entry"
        );
        Ok(())
    }

    /// Number of stored entries (in-flight entries excluded).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Unix timestamp of the earliest retry among stored entries.
    pub fn next_ready_at(&self) -> Option<f64> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|e| e.next_retry_at)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Write the current snapshot through the store.
    pub fn persist_now(&self) {
        let inner = self.inner.lock();
        self.persist(&inner);
    }

    fn persist(&self, inner: &QueueInner) {
        if let Err(e) = self.store.save(&inner.entries) {
            metrics::counter!("trailwatch_queue_persist_failures_total").increment(1);
            warn!(error = %e, "failed to persist offline queue snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::PayloadMetadata;

    pub(crate) fn test_payload(event_id: &str, priority: u8) -> SyncPayload {
        SyncPayload {
            detection_id: 1,
            device_id: "dev-01".to_string(),
            event_id: event_id.to_string(),
            camera_id: "cam-dev-01-0".to_string(),
            timestamp: 1_000.0,
            class_name: "leopard".to_string(),
            class_id: 16,
            confidence: 0.9,
            bbox: [0, 0, 10, 10],
            image_base64: None,
            priority,
            metadata: PayloadMetadata {
                processing_time_ms: 10.0,
                priority: if priority >= 5 { "high" } else { "normal" }.to_string(),
                frame_timestamp: 1_000.0,
                animal_category: "wild_cat".to_string(),
            },
        }
    }

    fn memory_queue(max_size: usize) -> DeliveryQueue {
        DeliveryQueue::new(max_size, Box::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_priority_ordering_across_tiers() {
        let queue = memory_queue(10);

        // Priorities [1, 5, 1, 5] in enqueue order
        queue.enqueue(test_payload("a", 1), 1.0).unwrap();
        queue.enqueue(test_payload("b", 5), 2.0).unwrap();
        queue.enqueue(test_payload("c", 1), 3.0).unwrap();
        queue.enqueue(test_payload("d", 5), 4.0).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| {
            queue
                .dequeue_ready(100.0)
                .map(|e| e.payload.event_id.clone())
        })
        .collect();

        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_queue_never_exceeds_bound() {
        let queue = memory_queue(5);

        for i in 0..50 {
            let _ = queue.enqueue(test_payload(&format!("e{i}"), (i % 3) as u8), i as f64);
            assert!(queue.len() <= 5);
        }
    }

    #[test]
    fn test_duplicate_event_id_is_noop() {
        let queue = memory_queue(10);

        queue.enqueue(test_payload("same", 5), 1.0).unwrap();
        queue.enqueue(test_payload("same", 5), 2.0).unwrap();

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_overflow_evicts_oldest_lowest_priority() {
        let queue = memory_queue(2);

        queue.enqueue(test_payload("low-old", 0), 1.0).unwrap();
        queue.enqueue(test_payload("low-new", 0), 2.0).unwrap();

        // Higher priority displaces the oldest low entry
        queue.enqueue(test_payload("high", 5), 3.0).unwrap();
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue_ready(100.0).unwrap();
        let second = queue.dequeue_ready(100.0).unwrap();
        assert_eq!(first.payload.event_id, "high");
        assert_eq!(second.payload.event_id, "low-new");
    }

    #[test]
    fn test_overflow_rejects_weaker_entry() {
        let queue = memory_queue(2);

        queue.enqueue(test_payload("h1", 5), 1.0).unwrap();
        queue.enqueue(test_payload("h2", 5), 2.0).unwrap();

        let result = queue.enqueue(test_payload("weak", 0), 3.0);
        assert!(matches!(result, Err(QueueError::QueueFull)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_equal_priority_displaces_victim() {
        let queue = memory_queue(1);

        queue.enqueue(test_payload("old", 5), 1.0).unwrap();
        queue.enqueue(test_payload("new", 5), 2.0).unwrap();

        let entry = queue.dequeue_ready(100.0).unwrap();
        assert_eq!(entry.payload.event_id, "new");
    }

    #[test]
    fn test_dequeue_respects_retry_time() {
        let queue = memory_queue(10);
        queue.enqueue(test_payload("a", 5), 10.0).unwrap();

        let entry = queue.dequeue_ready(10.0).unwrap();
        queue.requeue(entry, Duration::from_secs(30), 10.0).unwrap();

        // Not ready before the backoff elapses
        assert!(queue.dequeue_ready(20.0).is_none());
        let entry = queue.dequeue_ready(40.5).unwrap();
        assert_eq!(entry.attempt_count, 1);
    }

    #[test]
    fn test_requeue_preserves_tier_fifo() {
        let queue = memory_queue(10);

        queue.enqueue(test_payload("first", 5), 1.0).unwrap();
        queue.enqueue(test_payload("second", 5), 2.0).unwrap();

        // First fails and is requeued with zero backoff; it must still
        // drain ahead of "second" because its enqueue time is older.
        let entry = queue.dequeue_ready(100.0).unwrap();
        assert_eq!(entry.payload.event_id, "first");
        queue.requeue(entry, Duration::from_secs(0), 100.0).unwrap();

        let entry = queue.dequeue_ready(200.0).unwrap();
        assert_eq!(entry.payload.event_id, "first");
    }

    #[test]
    fn test_ack_is_idempotent() {
        let queue = memory_queue(10);
        queue.enqueue(test_payload("a", 5), 1.0).unwrap();

        let entry = queue.dequeue_ready(100.0).unwrap();
        queue.ack(&entry.payload.event_id);
        queue.ack(&entry.payload.event_id);

        assert!(queue.is_empty());
        // The id is released, so the same event could be enqueued again
        queue.enqueue(test_payload("a", 5), 2.0).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_in_flight_entry_blocks_duplicate_enqueue() {
        let queue = memory_queue(10);
        queue.enqueue(test_payload("a", 5), 1.0).unwrap();

        let _in_flight = queue.dequeue_ready(100.0).unwrap();
        queue.enqueue(test_payload("a", 5), 2.0).unwrap();

        // Still only the in-flight copy exists
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        {
            let queue =
                DeliveryQueue::new(10, Box::new(JsonFileStore::new(&path))).unwrap();
            queue.enqueue(test_payload("persisted", 5), 1.0).unwrap();
            queue.enqueue(test_payload("acked", 0), 2.0).unwrap();
            queue.ack("acked");
        }

        let queue = DeliveryQueue::new(10, Box::new(JsonFileStore::new(&path))).unwrap();
        assert_eq!(queue.len(), 1);
        let entry = queue.dequeue_ready(100.0).unwrap();
        assert_eq!(entry.payload.event_id, "persisted");
    }

    #[test]
    fn test_in_flight_entry_survives_crash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        {
            let queue =
                DeliveryQueue::new(10, Box::new(JsonFileStore::new(&path))).unwrap();
            queue.enqueue(test_payload("inflight", 5), 1.0).unwrap();
            // Dequeued but neither acked nor requeued: simulated crash
            let _ = queue.dequeue_ready(100.0).unwrap();
        }

        let queue = DeliveryQueue::new(10, Box::new(JsonFileStore::new(&path))).unwrap();
        assert_eq!(queue.len(), 1, "in-flight entry redelivered after restart");
    }

    #[test]
    fn test_next_ready_at() {
        let queue = memory_queue(10);
        assert!(queue.next_ready_at().is_none());

        queue.enqueue(test_payload("a", 0), 50.0).unwrap();
        queue.enqueue(test_payload("b", 5), 60.0).unwrap();
        assert_eq!(queue.next_ready_at(), Some(50.0));
    }
}
