//! Email alert sink (stub).
//!
//! Outbound SMTP is not wired up; this sink formats the subject and body a
//! real mailer would send and logs them. It keeps the email delivery path in
//! the sink registry so the transport can be dropped in later without
//! touching the bus.

use async_trait::async_trait;
use tracing::info;

use crate::alerts::Alert;
use crate::sinks::AlertSink;

/// Stub email sink. Serializes subject/body and logs instead of sending.
pub struct EmailSink {
    smtp_server: String,
    from: String,
    to: String,
    subject_prefix: String,
}

impl EmailSink {
    pub fn new(smtp_server: &str, from: &str, to: &str, subject_prefix: &str) -> Self {
        Self {
            smtp_server: smtp_server.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            subject_prefix: subject_prefix.to_string(),
        }
    }

    /// Subject line for an alert: `<prefix> - <TYPE>`.
    fn subject(&self, alert: &Alert) -> String {
        format!("{} - {}", self.subject_prefix, alert.alert_type)
    }

    /// Body for an alert: timestamp, severity, and message.
    fn body(&self, alert: &Alert) -> String {
        format!(
            "[{}] [Severity: {}] {}",
            alert.timestamp, alert.severity, alert.message
        )
    }
}

#[async_trait]
impl AlertSink for EmailSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        // No SMTP client yet; log what would be sent.
        info!(
            smtp = %self.smtp_server,
            from = %self.from,
            to = %self.to,
            subject = %self.subject(alert),
            body = %self.body(alert),
            "email alert (stub, not sent)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sink() -> EmailSink {
        EmailSink::new("smtp.example.com", "vigil@example.com", "admin@example.com", "Vigil Alert")
    }

    #[test]
    fn test_subject_includes_prefix_and_type() {
        let sink = make_sink();
        let alert = Alert::new("BRUTE_FORCE", "x", 5);
        assert_eq!(sink.subject(&alert), "Vigil Alert - BRUTE_FORCE");
    }

    #[test]
    fn test_body_includes_severity_and_message() {
        let sink = make_sink();
        let alert = Alert::new("ERROR", "disk on fire", 4);
        let body = sink.body(&alert);
        assert!(body.contains("[Severity: 4]"));
        assert!(body.ends_with("disk on fire"));
    }

    #[tokio::test]
    async fn test_send_is_a_no_op() {
        let sink = make_sink();
        let alert = Alert::new("INFO", "hello", 1);
        assert!(sink.send(&alert).await.is_ok());
    }
}
