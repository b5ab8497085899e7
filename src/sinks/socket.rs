//! UNIX-domain socket notifier.
//!
//! Forwards alerts with severity at or above a threshold to a local stream
//! socket (a chat-bot companion listens on the other end). One connection per
//! alert: connect with a 2-second timeout, write a single JSON document,
//! close. Delivery is best-effort.
//!
//! Wire shape: `{"ip":"...","reason":"...","timestamp":"YYYY-MM-DD HH:MM:SS"}`.
//! The document is built with `serde_json`, so quotes and newlines in the
//! reason are escaped properly.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::alerts::Alert;
use crate::sinks::AlertSink;

/// Default socket path the companion bot listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/hids/alert.sock";

/// Minimum severity forwarded when none is configured.
pub const DEFAULT_MIN_SEVERITY: u8 = 3;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Extract the source IP embedded in an alert message as `IP=<token>`.
///
/// The token runs up to the next space or the end of the string, verbatim.
pub fn extract_ip(message: &str) -> Option<&str> {
    let start = message.find("IP=")? + 3;
    let rest = &message[start..];
    let end = rest.find(' ').unwrap_or(rest.len());
    let token = &rest[..end];
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Serialize the notification document for one alert.
pub fn notification_json(alert: &Alert) -> String {
    let ip = extract_ip(&alert.message).unwrap_or("127.0.0.1");
    json!({
        "ip": ip,
        "reason": alert.message,
        "timestamp": alert.timestamp,
    })
    .to_string()
}

/// Sink that pushes qualifying alerts to the local notification socket.
pub struct SocketNotifier {
    socket_path: PathBuf,
    min_severity: u8,
}

impl SocketNotifier {
    pub fn new(socket_path: PathBuf, min_severity: u8) -> Self {
        Self {
            socket_path,
            min_severity,
        }
    }

    async fn push(&self, payload: &str) -> Result<()> {
        let mut stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .context("notification socket connect timed out")?
            .with_context(|| {
                format!(
                    "failed to connect notification socket: {}",
                    self.socket_path.display()
                )
            })?;
        stream
            .write_all(payload.as_bytes())
            .await
            .context("failed to write notification")?;
        stream.shutdown().await.ok();
        Ok(())
    }
}

#[async_trait]
impl AlertSink for SocketNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        if alert.severity < self.min_severity {
            return Ok(());
        }
        self.push(&notification_json(alert)).await
    }
}
