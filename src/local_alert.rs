//! Local alert output (buzzer/LED) driven over GPIO.
//!
//! Local alerting is best-effort auxiliary functionality: absent hardware is
//! a silent no-op and write failures are logged, never propagated. The pulse
//! pattern runs on a spawned task so detection handling never waits on
//! hardware timing.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Gap between pulses in the high-priority pattern.
const PULSE_GAP: Duration = Duration::from_millis(100);

/// Errors a GPIO backend can report
#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO write failed: {0}")]
    Write(String),
}

/// Hardware seam for the local alert output.
///
/// Implementations wrap the platform GPIO interface; the sink only depends
/// on level writes to a single pin.
pub trait GpioOutput: Send + Sync {
    fn set(&self, pin: u8, level: bool) -> Result<(), GpioError>;
}

/// GPIO backend writing through the Linux sysfs interface.
///
/// Construction fails on platforms without `/sys/class/gpio`; callers fall
/// back to a sink without hardware, which is the documented no-op mode.
pub struct SysfsGpio {
    base: std::path::PathBuf,
}

impl SysfsGpio {
    pub fn new(pin: u8) -> Result<Self, GpioError> {
        let root = std::path::Path::new("/sys/class/gpio");
        let base = root.join(format!("gpio{pin}"));

        if !base.exists() {
            std::fs::write(root.join("export"), pin.to_string())
                .map_err(|e| GpioError::Write(format!("export pin {pin}: {e}")))?;
        }
        std::fs::write(base.join("direction"), "out")
            .map_err(|e| GpioError::Write(format!("set direction on pin {pin}: {e}")))?;

        Ok(Self { base })
    }
}

impl GpioOutput for SysfsGpio {
    fn set(&self, pin: u8, level: bool) -> Result<(), GpioError> {
        let value = if level { "1" } else { "0" };
        std::fs::write(self.base.join("value"), value)
            .map_err(|e| GpioError::Write(format!("write pin {pin}: {e}")))
    }
}

/// Drives the local alert pin with a priority-dependent pulse pattern.
pub struct LocalAlertSink {
    gpio: Option<Arc<dyn GpioOutput>>,
    pin: u8,
    pulse: Duration,
}

impl LocalAlertSink {
    /// Create a sink. `gpio: None` models unavailable hardware; every
    /// `fire` becomes a no-op.
    pub fn new(gpio: Option<Arc<dyn GpioOutput>>, pin: u8, pulse: Duration) -> Self {
        Self { gpio, pin, pulse }
    }

    /// True when a hardware backend is wired.
    pub fn is_available(&self) -> bool {
        self.gpio.is_some()
    }

    /// Dispatch the pulse pattern for a detection. Returns immediately; the
    /// pattern plays out on its own task.
    pub fn fire(&self, class_name: &str, high_priority: bool) {
        let Some(gpio) = self.gpio.clone() else {
            return;
        };

        let pin = self.pin;
        let pulse = self.pulse;
        let class_name = class_name.to_string();

        tokio::spawn(async move {
            match run_pattern(gpio.as_ref(), pin, pulse, high_priority).await {
                Ok(()) => debug!(class_name, high_priority, "local alert fired"),
                Err(e) => warn!(class_name, error = %e, "local alert failed"),
            }
        });
    }
}

/// Play the pulse pattern: 3 pulses with 100ms gaps for high priority,
/// a single pulse otherwise.
pub(crate) async fn run_pattern(
    gpio: &dyn GpioOutput,
    pin: u8,
    pulse: Duration,
    high_priority: bool,
) -> Result<(), GpioError> {
    let pulses = if high_priority { 3 } else { 1 };

    for i in 0..pulses {
        gpio.set(pin, true)?;
        tokio::time::sleep(pulse).await;
        gpio.set(pin, false)?;
        if i + 1 < pulses {
            tokio::time::sleep(PULSE_GAP).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every level transition instead of touching hardware.
    pub struct RecordingGpio {
        pub transitions: Mutex<Vec<(u8, bool)>>,
    }

    impl RecordingGpio {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                transitions: Mutex::new(Vec::new()),
            })
        }

        pub fn pulse_count(&self) -> usize {
            self.transitions
                .lock()
                .iter()
                .filter(|(_, level)| *level)
                .count()
        }
    }

    impl GpioOutput for RecordingGpio {
        fn set(&self, pin: u8, level: bool) -> Result<(), GpioError> {
            self.transitions.lock().push((pin, level));
            Ok(())
        }
    }

    struct FailingGpio;

    impl GpioOutput for FailingGpio {
        fn set(&self, _pin: u8, _level: bool) -> Result<(), GpioError> {
            Err(GpioError::Write("pin unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_high_priority_pattern_is_three_pulses() {
        let gpio = RecordingGpio::new();
        run_pattern(gpio.as_ref(), 17, Duration::from_millis(1), true)
            .await
            .unwrap();

        assert_eq!(gpio.pulse_count(), 3);
        // Pattern ends with the pin low
        assert_eq!(gpio.transitions.lock().last(), Some(&(17, false)));
    }

    #[tokio::test]
    async fn test_normal_pattern_is_single_pulse() {
        let gpio = RecordingGpio::new();
        run_pattern(gpio.as_ref(), 17, Duration::from_millis(1), false)
            .await
            .unwrap();

        assert_eq!(gpio.pulse_count(), 1);
        assert_eq!(gpio.transitions.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_hardware_is_silent_noop() {
        let sink = LocalAlertSink::new(None, 17, Duration::from_millis(1));
        assert!(!sink.is_available());
        // Must not panic or spawn anything meaningful
        sink.fire("tiger", true);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_as_error() {
        let result = run_pattern(&FailingGpio, 17, Duration::from_millis(1), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fire_returns_before_pattern_completes() {
        let gpio = RecordingGpio::new();
        let sink = LocalAlertSink::new(
            Some(gpio.clone() as Arc<dyn GpioOutput>),
            17,
            Duration::from_millis(50),
        );

        let start = std::time::Instant::now();
        sink.fire("leopard", true);
        assert!(start.elapsed() < Duration::from_millis(20));

        // Let the spawned pattern finish
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(gpio.pulse_count(), 3);
    }
}
