use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the trailwatch agent
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Device identity
    #[serde(default)]
    pub device: DeviceConfig,
    /// Alerting configuration
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Dashboard connection configuration
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Path of the offline queue snapshot file
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
}

/// Device identity configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (generated when empty)
    #[serde(default)]
    pub id: String,
    /// Human-readable device name
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// Alerting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Master switch for all alerting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum interval between local alerts for the same class
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Class names treated as high priority (empty = built-in tracked species)
    #[serde(default)]
    pub high_priority_classes: Vec<String>,
    /// Local GPIO alert configuration
    #[serde(default)]
    pub local: LocalAlertConfig,
    /// Remote dashboard alert configuration
    #[serde(default)]
    pub remote: RemoteAlertConfig,
}

/// Local GPIO alert configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LocalAlertConfig {
    /// Enable GPIO-backed local alerts
    #[serde(default)]
    pub gpio_enabled: bool,
    /// BCM pin number of the buzzer/LED
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u8,
    /// Pulse duration in milliseconds
    #[serde(default = "default_buzzer_duration_ms")]
    pub buzzer_duration_ms: u64,
}

/// Remote dashboard alert configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAlertConfig {
    /// Enable remote delivery
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Attach a compressed frame image to each payload
    #[serde(default = "default_true")]
    pub include_image: bool,
    /// Size budget for attached images in KB
    #[serde(default = "default_image_max_size_kb")]
    pub image_max_size_kb: u32,
    /// Delivery attempts per queue entry before dropping it
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base retry delay in seconds (doubled per attempt)
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

/// Dashboard connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Dashboard API base URL
    #[serde(default)]
    pub api_url: String,
    /// Device-scoped API key
    #[serde(default)]
    pub api_key: String,
    /// Shared secret for HMAC request signing (unsigned requests when unset)
    #[serde(default)]
    pub device_secret: Option<String>,
    /// Delivery worker poll interval in seconds; also caps retry backoff
    #[serde(default = "default_sync_interval_seconds")]
    pub sync_interval_seconds: u64,
    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    /// Maximum number of entries in the offline queue
    #[serde(default = "default_offline_queue_max_size")]
    pub offline_queue_max_size: usize,
    /// Per-attempt request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "trailwatch".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_queue_path() -> String {
    "data/offline_queue.json".to_string()
}

fn default_device_name() -> String {
    "trailwatch-001".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cooldown_seconds() -> u64 {
    60
}

fn default_gpio_pin() -> u8 {
    17
}

fn default_buzzer_duration_ms() -> u64 {
    500
}

fn default_image_max_size_kb() -> u32 {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_sync_interval_seconds() -> u64 {
    300
}

fn default_heartbeat_interval_seconds() -> u64 {
    60
}

fn default_offline_queue_max_size() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/trailwatch").required(false))
            .add_source(config::File::with_name("/etc/trailwatch/config").required(false))
            // TRAILWATCH__DASHBOARD__API_KEY -> dashboard.api_key
            .add_source(
                config::Environment::with_prefix("TRAILWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.ensure_device_id();
        Ok(config)
    }

    /// Assign a generated device id when none is configured
    fn ensure_device_id(&mut self) {
        if self.device.id.is_empty() {
            self.device.id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        }
    }

    /// Get local alert cooldown as Duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.alerts.cooldown_seconds)
    }

    /// Get buzzer pulse duration as Duration
    pub fn buzzer_duration(&self) -> Duration {
        Duration::from_millis(self.alerts.local.buzzer_duration_ms)
    }

    /// Get base retry delay as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.alerts.remote.retry_delay_seconds)
    }

    /// Get worker poll interval as Duration
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.dashboard.sync_interval_seconds)
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.dashboard.heartbeat_interval_seconds)
    }

    /// Get per-attempt request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            queue_path: default_queue_path(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: default_device_name(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: default_cooldown_seconds(),
            high_priority_classes: Vec::new(),
            local: LocalAlertConfig::default(),
            remote: RemoteAlertConfig::default(),
        }
    }
}

impl Default for LocalAlertConfig {
    fn default() -> Self {
        Self {
            gpio_enabled: false,
            gpio_pin: default_gpio_pin(),
            buzzer_duration_ms: default_buzzer_duration_ms(),
        }
    }
}

impl Default for RemoteAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_image: true,
            image_max_size_kb: default_image_max_size_kb(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            device_secret: None,
            sync_interval_seconds: default_sync_interval_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            offline_queue_max_size: default_offline_queue_max_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_cooldown_seconds(), 60);
        assert_eq!(default_retry_attempts(), 3);
        assert_eq!(default_offline_queue_max_size(), 1000);
        assert_eq!(default_image_max_size_kb(), 100);
    }

    #[test]
    fn test_device_id_generated_when_empty() {
        let mut config = Config {
            service: ServiceConfig::default(),
            device: DeviceConfig::default(),
            alerts: AlertsConfig::default(),
            dashboard: DashboardConfig::default(),
        };
        config.ensure_device_id();
        assert_eq!(config.device.id.len(), 8);
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config {
            service: ServiceConfig::default(),
            device: DeviceConfig::default(),
            alerts: AlertsConfig::default(),
            dashboard: DashboardConfig::default(),
        };
        assert_eq!(config.cooldown(), Duration::from_secs(60));
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.buzzer_duration(), Duration::from_millis(500));
    }
}
