//! Alert sink abstraction layer.
//!
//! Defines [`AlertSink`], the trait every alert consumer implements, and the
//! built-in sinks:
//! - [`FileSink`](file::FileSink): appends one formatted line per alert
//! - [`EmailSink`](email::EmailSink): stub that formats subject/body
//! - [`SocketNotifier`](socket::SocketNotifier): forwards high-severity
//!   alerts as JSON over a UNIX-domain socket
//!
//! Sinks are registered on the [`AlertBus`](crate::bus::AlertBus) by name and
//! invoked synchronously on the producer's task. A sink must be safe to call
//! from any task and must not call back into the bus.

pub mod email;
pub mod file;
pub mod socket;

use async_trait::async_trait;

use crate::alerts::Alert;

/// A terminal consumer of alerts.
///
/// Implementations must be `Send + Sync` so they can be stored as
/// `Arc<dyn AlertSink>` and shared across tasks. Errors are the sink's own
/// problem: the bus logs and discards them.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. Keep the work bounded — the bus lock is held for
    /// the duration of the fan-out.
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

#[cfg(test)]
pub mod testing {
    //! Test double shared by bus and detector tests.

    use std::sync::Mutex;

    use super::*;

    /// Records every alert it receives; optionally fails each send.
    pub struct RecordingSink {
        received: Mutex<Vec<Alert>>,
        fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                received: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        /// A sink whose `send` always errors (after recording the alert).
        pub fn failing() -> Self {
            Self {
                received: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn alerts(&self) -> Vec<Alert> {
            self.received.lock().unwrap().clone()
        }

        /// Alert type tokens in arrival order.
        pub fn types(&self) -> Vec<String> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|a| a.alert_type.clone())
                .collect()
        }

        /// Count of received alerts with the given type token.
        pub fn count_of(&self, alert_type: &str) -> usize {
            self.received
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.alert_type == alert_type)
                .count()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
            self.received.lock().unwrap().push(alert.clone());
            if self.fail {
                anyhow::bail!("recording sink configured to fail");
            }
            Ok(())
        }
    }
}
