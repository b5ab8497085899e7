//! Alert bus: typed event dispatch with per-type policy.
//!
//! Detectors call [`AlertBus::trigger`] with a type token and message. The
//! bus checks whether the type is enabled, looks up its severity, stamps the
//! alert, and fans it out synchronously to every registered sink. Policy and
//! the sink registry live under a single lock, so a slow sink blocks all
//! producers — sinks must keep their work bounded.
//!
//! The bus itself never fails; sink errors are logged and swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::alerts::{clamp_severity, Alert};
use crate::sinks::AlertSink;

struct BusInner {
    /// name -> sink, name unique; upsert on add
    sinks: HashMap<String, Arc<dyn AlertSink>>,
    /// type -> enabled; absence means enabled
    enabled: HashMap<String, bool>,
    /// type -> severity 1..=5; absence means 1
    severity: HashMap<String, u8>,
}

/// Shared alert dispatcher. Detectors hold it as `Arc<AlertBus>`.
pub struct AlertBus {
    inner: Mutex<BusInner>,
}

impl AlertBus {
    /// Create a bus with the default per-type policy: all types enabled,
    /// `BRUTE_FORCE=5`, `ERROR=4`, `FAILED_LOGIN=2`, `SUCCESS_LOGIN=1`.
    pub fn new() -> Self {
        let mut severity = HashMap::new();
        severity.insert("BRUTE_FORCE".to_string(), 5);
        severity.insert("FAILED_LOGIN".to_string(), 2);
        severity.insert("SUCCESS_LOGIN".to_string(), 1);
        severity.insert("ERROR".to_string(), 4);

        let mut enabled = HashMap::new();
        for ty in ["BRUTE_FORCE", "FAILED_LOGIN", "SUCCESS_LOGIN", "ERROR"] {
            enabled.insert(ty.to_string(), true);
        }

        Self {
            inner: Mutex::new(BusInner {
                sinks: HashMap::new(),
                enabled,
                severity,
            }),
        }
    }

    /// Register a sink under `name`, replacing any previous sink of that name.
    pub async fn add_sink(&self, name: &str, sink: Arc<dyn AlertSink>) {
        let mut inner = self.inner.lock().await;
        inner.sinks.insert(name.to_string(), sink);
    }

    /// Remove the sink registered under `name`. No-op if absent.
    pub async fn remove_sink(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        inner.sinks.remove(name);
    }

    /// Enable or disable alerts of the given type.
    pub async fn enable_type(&self, alert_type: &str, enabled: bool) {
        let mut inner = self.inner.lock().await;
        inner.enabled.insert(alert_type.to_string(), enabled);
    }

    /// Set the severity assigned to alerts of the given type, clamped to 1..=5.
    pub async fn set_severity(&self, alert_type: &str, severity: i64) {
        let mut inner = self.inner.lock().await;
        inner
            .severity
            .insert(alert_type.to_string(), clamp_severity(severity));
    }

    /// Emit an alert of `alert_type` with `message`.
    ///
    /// Returns silently if the type has been disabled. Every registered sink
    /// is invoked even if an earlier one fails; failures are logged via
    /// `tracing` and otherwise ignored.
    pub async fn trigger(&self, alert_type: &str, message: &str) {
        let inner = self.inner.lock().await;

        if let Some(false) = inner.enabled.get(alert_type) {
            return;
        }

        let severity = inner.severity.get(alert_type).copied().unwrap_or(1);
        let alert = Alert::new(alert_type, message, severity as i64);

        for (name, sink) in &inner.sinks {
            if let Err(e) = sink.send(&alert).await {
                warn!(sink = %name, error = %e, "alert sink failed");
            }
        }
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}
