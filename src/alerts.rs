//! Core alert type shared across all Vigil detectors.
//!
//! Every detection engine produces [`Alert`] values through the
//! [`AlertBus`](crate::bus::AlertBus). An alert carries a short uppercase
//! type token (e.g. `BRUTE_FORCE`, `FILE_MODIFIED`), a human-readable
//! message, a local-time timestamp, and a severity in 1..=5.

use std::fmt;

use chrono::Local;

/// Severity scale: 1 informational, 2 low, 3 medium, 4 high, 5 critical.
/// Sinks may filter on a severity threshold.
pub const SEVERITY_MIN: u8 = 1;
pub const SEVERITY_MAX: u8 = 5;

/// Clamp an operator-supplied severity into the valid 1..=5 range.
pub fn clamp_severity(severity: i64) -> u8 {
    severity.clamp(SEVERITY_MIN as i64, SEVERITY_MAX as i64) as u8
}

/// Format a wall-clock timestamp the way alerts carry it.
pub fn format_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A classified, timestamped security alert.
///
/// Alerts are created by the bus at trigger time and never mutated; each
/// registered sink sees the same record.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Short uppercase type token (`BRUTE_FORCE`, `FILE_DELETED`, ...)
    pub alert_type: String,
    /// Human-readable description of what happened
    pub message: String,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    /// How serious this alert is, 1..=5
    pub severity: u8,
}

impl Alert {
    /// Create a new alert timestamped to now. Severity is clamped on entry.
    pub fn new(alert_type: &str, message: &str, severity: i64) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            message: message.to_string(),
            timestamp: format_timestamp(),
            severity: clamp_severity(severity),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [Severity: {}] [Type: {}] {}",
            self.timestamp, self.severity, self.alert_type, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_clamps_low() {
        assert_eq!(clamp_severity(0), 1);
        assert_eq!(clamp_severity(-7), 1);
    }

    #[test]
    fn test_severity_clamps_high() {
        assert_eq!(clamp_severity(6), 5);
        assert_eq!(clamp_severity(100), 5);
    }

    #[test]
    fn test_severity_in_range_unchanged() {
        for s in 1..=5 {
            assert_eq!(clamp_severity(s), s as u8);
        }
    }

    #[test]
    fn test_alert_has_timestamp() {
        let alert = Alert::new("ERROR", "something broke", 4);
        assert!(!alert.timestamp.is_empty());
        assert_eq!(alert.alert_type, "ERROR");
        assert_eq!(alert.severity, 4);
    }

    #[test]
    fn test_display_format() {
        let alert = Alert::new("FAILED_LOGIN", "user=bob, IP=10.0.0.1", 2);
        let line = alert.to_string();
        assert!(line.contains("[Severity: 2]"));
        assert!(line.contains("[Type: FAILED_LOGIN]"));
        assert!(line.ends_with("user=bob, IP=10.0.0.1"));
    }

    #[test]
    fn test_timestamp_format_shape() {
        let ts = format_timestamp();
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }
}
