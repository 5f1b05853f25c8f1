//! Priority classification and local-alert cooldown tracking.

use crate::detection::Priority;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Tracked wild-cat species, alerted with high priority by default.
pub const TRACKED_SPECIES: [&str; 9] = [
    "tiger",
    "lion",
    "leopard",
    "jaguar",
    "cheetah",
    "snow leopard",
    "clouded leopard",
    "puma",
    "lynx",
];

/// Maps class names to priority tiers and tracks per-class cooldown.
///
/// Cooldown gates local alerting only; remote delivery always proceeds so
/// the dashboard keeps the full detection record. State is owned by the
/// alert service and reset on restart.
pub struct AlertClassifier {
    high_priority: HashSet<String>,
    cooldown_seconds: u64,
    last_alert: HashMap<String, f64>,
}

impl AlertClassifier {
    /// Create a classifier. An empty `high_priority_classes` list selects
    /// the built-in tracked species.
    pub fn new(high_priority_classes: &[String], cooldown_seconds: u64) -> Self {
        let high_priority = if high_priority_classes.is_empty() {
            TRACKED_SPECIES.iter().map(|s| s.to_string()).collect()
        } else {
            high_priority_classes.iter().cloned().collect()
        };

        Self {
            high_priority,
            cooldown_seconds,
            last_alert: HashMap::new(),
        }
    }

    /// Classify a class name into a priority tier. Pure, infallible.
    pub fn classify(&self, class_name: &str) -> Priority {
        if self.high_priority.contains(class_name) {
            Priority::High
        } else {
            Priority::Normal
        }
    }

    /// Coarse species category carried in payload metadata.
    pub fn animal_category(&self, class_name: &str) -> &'static str {
        if TRACKED_SPECIES.contains(&class_name) {
            "wild_cat"
        } else {
            "other"
        }
    }

    /// True iff a local alert for this class fired within the cooldown window.
    pub fn should_suppress(&self, class_name: &str, now: f64) -> bool {
        match self.last_alert.get(class_name) {
            Some(last) => {
                let suppress = now - last < self.cooldown_seconds as f64;
                if suppress {
                    trace!(class_name, "local alert suppressed by cooldown");
                }
                suppress
            }
            None => false,
        }
    }

    /// Record that an alert was dispatched for this class.
    pub fn record_alert(&mut self, class_name: &str, now: f64) {
        self.last_alert.insert(class_name.to_string(), now);
    }

    /// Snapshot of per-class last-alert times.
    pub fn last_alerts(&self) -> HashMap<String, f64> {
        self.last_alert.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tracked_species_are_high_priority() {
        let classifier = AlertClassifier::new(&[], 60);

        assert_eq!(classifier.classify("tiger"), Priority::High);
        assert_eq!(classifier.classify("snow leopard"), Priority::High);
        assert_eq!(classifier.classify("deer"), Priority::Normal);
        assert_eq!(classifier.classify("bird"), Priority::Normal);
    }

    #[test]
    fn test_configured_override_replaces_default_set() {
        let classes = vec!["wolf".to_string()];
        let classifier = AlertClassifier::new(&classes, 60);

        assert_eq!(classifier.classify("wolf"), Priority::High);
        assert_eq!(classifier.classify("tiger"), Priority::Normal);
    }

    #[test]
    fn test_animal_category_follows_tracked_species() {
        let classes = vec!["wolf".to_string()];
        let classifier = AlertClassifier::new(&classes, 60);

        // Category reflects species, not the configured priority set
        assert_eq!(classifier.animal_category("leopard"), "wild_cat");
        assert_eq!(classifier.animal_category("wolf"), "other");
    }

    #[test]
    fn test_cooldown_suppression_window() {
        let mut classifier = AlertClassifier::new(&[], 60);

        assert!(!classifier.should_suppress("leopard", 1000.0));
        classifier.record_alert("leopard", 1000.0);

        // 10s later: suppressed
        assert!(classifier.should_suppress("leopard", 1010.0));
        // Other classes unaffected
        assert!(!classifier.should_suppress("tiger", 1010.0));
        // Past the window: allowed again
        assert!(!classifier.should_suppress("leopard", 1060.0));
    }

    #[test]
    fn test_last_alerts_snapshot() {
        let mut classifier = AlertClassifier::new(&[], 60);
        classifier.record_alert("tiger", 123.0);
        classifier.record_alert("lynx", 456.0);

        let snapshot = classifier.last_alerts();
        assert_eq!(snapshot.get("tiger"), Some(&123.0));
        assert_eq!(snapshot.get("lynx"), Some(&456.0));
    }
}
