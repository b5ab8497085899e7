//! File alert sink: append-only log of every accepted alert.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::alerts::Alert;
use crate::sinks::AlertSink;

/// Appends one line per alert, `[ts] [Severity: N] [Type: T] message`,
/// flushed immediately so a crash loses at most the in-flight alert.
///
/// The sink holds its own mutex over the file handle; the bus may call it
/// from any producer task.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Open (or create) the alert log at `path` in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open alert log: {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AlertSink for FileSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("alert log mutex poisoned"))?;
        writeln!(file, "{}", alert).context("failed to append alert")?;
        file.flush().context("failed to flush alert log")?;
        Ok(())
    }
}
