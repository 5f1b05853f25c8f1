//! Background delivery worker draining the offline queue.
//!
//! A single long-lived loop takes the highest-priority ready entry, attempts
//! delivery through the dashboard transport with a hard per-attempt timeout,
//! and either acks, requeues with exponential backoff, or drops the entry
//! once its attempts are exhausted. Shutdown drains whatever is ready within
//! a bounded grace period and persists the remaining queue state.

use crate::config::Config;
use crate::detection::unix_now;
use crate::queue::{DeliveryQueue, QueuedEntry};
use crate::transport::{DashboardTransport, HeartbeatStatus, TransportError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Delivery counters shared with the alert service for `get_stats`.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    transient_failures: AtomicU64,
    permanent_failures: AtomicU64,
}

impl DeliveryStats {
    /// Count one successful delivery (worker or immediate path).
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn transient_failures(&self) -> u64 {
        self.transient_failures.load(Ordering::Relaxed)
    }

    pub fn permanent_failures(&self) -> u64 {
        self.permanent_failures.load(Ordering::Relaxed)
    }
}

/// Worker tuning knobs, extracted from configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Failed attempts tolerated per entry before it is dropped
    pub retry_attempts: u32,
    /// Base backoff delay, doubled per attempt
    pub retry_delay: Duration,
    /// Upper bound on the backoff delay
    pub max_backoff: Duration,
    /// Poll interval when no entry is ready
    pub poll_interval: Duration,
    /// Hard per-attempt delivery timeout
    pub request_timeout: Duration,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            retry_attempts: config.alerts.remote.retry_attempts,
            retry_delay: config.retry_delay(),
            max_backoff: config.sync_interval(),
            poll_interval: config.sync_interval(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Background loop delivering queued payloads to the dashboard.
pub struct DeliveryWorker {
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn DashboardTransport>,
    settings: WorkerSettings,
    stats: Arc<DeliveryStats>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        transport: Arc<dyn DashboardTransport>,
        settings: WorkerSettings,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            transport,
            settings,
            stats,
            running: AtomicBool::new(true),
            shutdown_tx,
        }
    }

    /// Signal the loop to stop after the current cycle.
    pub fn shutdown(&self) {
        info!("signaling delivery worker shutdown");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Receiver tied to this worker's shutdown signal, for companion loops.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the delivery loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        let wake = self.queue.wake_handle();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            retry_attempts = self.settings.retry_attempts,
            poll_interval_secs = self.settings.poll_interval.as_secs_f64(),
            "delivery worker started"
        );

        while self.running.load(Ordering::SeqCst) {
            while let Some(entry) = self.queue.dequeue_ready(unix_now()) {
                self.attempt_delivery(entry).await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = wake.notified() => {}
                _ = tokio::time::sleep(self.sleep_until_next_ready()) => {}
            }
        }

        self.drain().await;
        self.queue.persist_now();
        info!("delivery worker stopped");
    }

    /// Time to sleep before the next poll: the earliest retry time, bounded
    /// by the poll interval.
    fn sleep_until_next_ready(&self) -> Duration {
        let now = unix_now();
        match self.queue.next_ready_at() {
            Some(at) if at <= now => Duration::ZERO,
            Some(at) => Duration::from_secs_f64(at - now).min(self.settings.poll_interval),
            None => self.settings.poll_interval,
        }
    }

    /// One delivery attempt for one entry: ack on success, requeue with
    /// backoff on transient failure, drop once attempts are exhausted.
    async fn attempt_delivery(&self, entry: QueuedEntry) {
        let event_id = entry.payload.event_id.clone();
        let class_name = entry.payload.class_name.clone();

        let outcome = tokio::time::timeout(
            self.settings.request_timeout,
            self.transport.send_immediate(entry.payload.clone()),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(self.settings.request_timeout)));

        match outcome {
            Ok(()) => {
                self.queue.ack(&event_id);
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("trailwatch_delivered_total").increment(1);
                debug!(event_id = %event_id, class_name = %class_name, "queued payload delivered");
            }
            Err(e) => {
                self.stats.transient_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("trailwatch_delivery_failures_total").increment(1);

                if entry.attempt_count >= self.settings.retry_attempts {
                    self.queue.ack(&event_id);
                    self.stats.permanent_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("trailwatch_delivery_permanent_failures_total").increment(1);
                    warn!(
                        event_id = %event_id,
                        class_name = %class_name,
                        attempts = entry.attempt_count + 1,
                        error = %e,
                        "delivery attempts exhausted, dropping entry"
                    );
                    return;
                }

                let backoff = backoff_delay(
                    self.settings.retry_delay,
                    entry.attempt_count,
                    self.settings.max_backoff,
                );
                debug!(
                    event_id = %event_id,
                    attempt = entry.attempt_count + 1,
                    backoff_secs = backoff.as_secs_f64(),
                    error = %e,
                    "delivery failed, scheduling retry"
                );
                if self.queue.requeue(entry, backoff, unix_now()).is_err() {
                    warn!(event_id = %event_id, "queue full, failed entry dropped");
                }
            }
        }
    }

    /// Best-effort batch delivery of everything ready, within one request
    /// timeout, before shutdown.
    async fn drain(&self) {
        let now = unix_now();
        let mut entries = Vec::new();
        while let Some(entry) = self.queue.dequeue_ready(now) {
            entries.push(entry);
        }
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "draining ready entries before shutdown");
        let payloads: Vec<_> = entries.iter().map(|e| e.payload.clone()).collect();

        let outcomes = match tokio::time::timeout(
            self.settings.request_timeout,
            self.transport.send_batch(payloads),
        )
        .await
        {
            Ok(outcomes) => outcomes,
            Err(_) => {
                // Timed out: everything goes back for the next start
                for entry in entries {
                    let _ = self.queue.requeue(entry, Duration::ZERO, unix_now());
                }
                return;
            }
        };

        for (entry, outcome) in entries.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    self.queue.ack(&entry.payload.event_id);
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    let _ = self.queue.requeue(entry, Duration::ZERO, unix_now());
                }
            }
        }
    }
}

/// Exponential backoff: `retry_delay * 2^attempt_count`, capped.
pub fn backoff_delay(retry_delay: Duration, attempt_count: u32, max_backoff: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt_count.min(16));
    retry_delay.saturating_mul(factor).min(max_backoff)
}

/// Periodic heartbeat loop reporting device liveness and queue depth.
pub async fn heartbeat_loop(
    transport: Arc<dyn DashboardTransport>,
    queue: Arc<DeliveryQueue>,
    device_id: String,
    device_name: String,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let started = std::time::Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let status = HeartbeatStatus {
                    device_id: device_id.clone(),
                    device_name: device_name.clone(),
                    uptime_seconds: started.elapsed().as_secs(),
                    queue_depth: queue.len(),
                    timestamp: unix_now(),
                };
                if let Err(e) = transport.heartbeat(status).await {
                    debug!(error = %e, "heartbeat failed");
                }
            }
        }
    }
}
