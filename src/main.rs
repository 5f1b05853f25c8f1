use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trailwatch::local_alert::SysfsGpio;
use trailwatch::worker::heartbeat_loop;
use trailwatch::{
    AlertService, Config, DeliveryQueue, DeliveryStats, DeliveryWorker, GpioOutput,
    HttpTransport, JsonFileStore, LocalAlertSink, WorkerSettings,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        device_id = %config.device.id,
        "Starting Trailwatch agent"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Offline queue, restored from the on-disk snapshot
    let queue = Arc::new(
        DeliveryQueue::new(
            config.dashboard.offline_queue_max_size,
            Box::new(JsonFileStore::new(&config.service.queue_path)),
        )
        .context("Failed to restore offline queue")?,
    );

    // Dashboard transport
    let transport = Arc::new(
        HttpTransport::new(&config.dashboard, config.device.id.clone())
            .context("Failed to create dashboard transport")?,
    );

    // Local alert hardware: unavailable GPIO degrades to a silent no-op
    let gpio = if config.alerts.local.gpio_enabled {
        match SysfsGpio::new(config.alerts.local.gpio_pin) {
            Ok(gpio) => {
                info!(pin = config.alerts.local.gpio_pin, "GPIO initialized");
                Some(Arc::new(gpio) as Arc<dyn GpioOutput>)
            }
            Err(e) => {
                warn!(error = %e, "GPIO initialization failed, local alerts disabled");
                None
            }
        }
    } else {
        None
    };
    let local_sink = LocalAlertSink::new(
        gpio,
        config.alerts.local.gpio_pin,
        config.buzzer_duration(),
    );

    let delivery_stats = Arc::new(DeliveryStats::default());

    let worker = Arc::new(DeliveryWorker::new(
        queue.clone(),
        transport.clone(),
        WorkerSettings::from(&config),
        delivery_stats.clone(),
    ));

    // Entry point for the capture/inference loop
    let alert_service = Arc::new(AlertService::new(
        &config,
        local_sink,
        queue.clone(),
        transport.clone(),
        delivery_stats,
    ));

    // Spawn the delivery worker
    let worker_runner = worker.clone();
    let worker_handle = tokio::spawn(async move { worker_runner.run().await });

    // Spawn the heartbeat loop
    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        transport.clone(),
        queue.clone(),
        config.device.id.clone(),
        config.device.name.clone(),
        config.heartbeat_interval(),
        worker.shutdown_receiver(),
    ));

    // Periodic stats log for operators tailing the journal
    let stats_service = alert_service.clone();
    let mut stats_shutdown = worker.shutdown_receiver();
    let stats_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stats_shutdown.recv() => break,
                _ = ticker.tick() => {
                    let stats = stats_service.get_stats();
                    info!(
                        alert_count = stats.alert_count,
                        queue_depth = stats.queue_depth,
                        delivered = stats.delivered,
                        permanent_failures = stats.permanent_failures,
                        lost_payloads = stats.lost_payloads,
                        "agent statistics"
                    );
                }
            }
        }
    });

    info!("Trailwatch agent started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down Trailwatch agent");

    worker.shutdown();
    let _ = worker_handle.await;
    heartbeat_handle.abort();
    stats_handle.abort();

    info!("Trailwatch agent stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
