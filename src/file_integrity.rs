//! File integrity monitor.
//!
//! Keeps a baseline of `(SHA-256, size, mtime)` per monitored path and
//! periodically compares the on-disk state against it. Differences are
//! classified as deletion, content change, size change, or mtime change, in
//! that priority order. The baseline is never updated automatically; the
//! operator accepts a new state by calling [`FileIntegrityMonitor::update_baselines`].
//!
//! Changes are detected by polling only. A change handler can be installed
//! to feed every detected difference to an external reaction (syslog, a
//! notification port, a quarantine step).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bus::AlertBus;

/// Recorded state of one monitored file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: String,
    /// Lowercase hex SHA-256 of the full content
    pub hash: String,
    pub last_modified: SystemTime,
    pub size: u64,
}

/// Callback invoked for every detected difference: `(path, baseline, current)`.
/// `current` is `None` when the file has been deleted.
pub type ChangeHandler = Box<dyn Fn(&str, &FileInfo, Option<&FileInfo>) + Send + Sync>;

/// Streamed SHA-256 of a file's content, rendered as lowercase hex.
///
/// Reads in 8 KiB chunks so arbitrarily large files are supported without
/// buffering them whole.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Capture the current `FileInfo` for a regular file.
pub fn file_info(path: &Path) -> Result<FileInfo> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to stat file: {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("not a regular file: {}", path.display());
    }
    Ok(FileInfo {
        path: path.to_string_lossy().to_string(),
        hash: hash_file(path)?,
        last_modified: meta
            .modified()
            .with_context(|| format!("failed to read mtime: {}", path.display()))?,
        size: meta.len(),
    })
}

struct IntegrityState {
    /// path -> baseline info; a path is present iff explicitly added and not removed
    baseline: HashMap<String, FileInfo>,
    change_handler: Option<ChangeHandler>,
}

/// Periodic content-hash comparison of a fixed list of critical files.
pub struct FileIntegrityMonitor {
    bus: Arc<AlertBus>,
    state: Mutex<IntegrityState>,
    should_stop: AtomicBool,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FileIntegrityMonitor {
    pub fn new(bus: Arc<AlertBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(IntegrityState {
                baseline: HashMap::new(),
                change_handler: None,
            }),
            should_stop: AtomicBool::new(false),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Install a callback invoked on every detected difference.
    pub async fn set_change_handler(&self, handler: ChangeHandler) {
        let mut state = self.state.lock().await;
        state.change_handler = Some(handler);
    }

    /// Record a baseline for `path`. Missing or non-regular paths are
    /// rejected with an `ERROR` alert and no entry is inserted.
    pub async fn add_file(&self, path: &Path) {
        if !path.is_file() {
            self.bus
                .trigger(
                    "ERROR",
                    &format!(
                        "Cannot monitor file: {} (missing or not a regular file)",
                        path.display()
                    ),
                )
                .await;
            return;
        }
        match file_info(path) {
            Ok(info) => {
                let preview = &info.hash[..10.min(info.hash.len())];
                let message = format!("Monitoring file: {} (hash: {}...)", path.display(), preview);
                let mut state = self.state.lock().await;
                state.baseline.insert(info.path.clone(), info);
                drop(state);
                self.bus.trigger("INFO", &message).await;
            }
            Err(e) => {
                self.bus
                    .trigger(
                        "ERROR",
                        &format!("Failed to baseline file: {}: {:#}", path.display(), e),
                    )
                    .await;
            }
        }
    }

    /// Enumerate regular files under `dir` and add each one.
    pub async fn add_directory(&self, dir: &Path, recursive: bool) {
        if !dir.is_dir() {
            self.bus
                .trigger(
                    "ERROR",
                    &format!(
                        "Cannot monitor directory: {} (missing or not a directory)",
                        dir.display()
                    ),
                )
                .await;
            return;
        }

        let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = match std::fs::read_dir(&current) {
                Ok(entries) => entries,
                Err(e) => {
                    self.bus
                        .trigger(
                            "ERROR",
                            &format!("Failed to scan directory: {}: {}", current.display(), e),
                        )
                        .await;
                    continue;
                }
            };
            for entry in entries.flatten() {
                let entry_path = entry.path();
                if entry_path.is_file() {
                    self.add_file(&entry_path).await;
                } else if recursive && entry_path.is_dir() {
                    pending.push(entry_path);
                }
            }
        }
    }

    /// Drop `path` from the baseline. No-op if it was never added.
    pub async fn remove_file(&self, path: &Path) {
        let key = path.to_string_lossy().to_string();
        let removed = {
            let mut state = self.state.lock().await;
            state.baseline.remove(&key).is_some()
        };
        if removed {
            self.bus
                .trigger("INFO", &format!("Stopped monitoring file: {}", path.display()))
                .await;
        }
    }

    /// Number of monitored paths.
    pub async fn monitored_count(&self) -> usize {
        self.state.lock().await.baseline.len()
    }

    #[cfg(test)]
    async fn baseline_of(&self, path: &Path) -> Option<FileInfo> {
        let key = path.to_string_lossy().to_string();
        self.state.lock().await.baseline.get(&key).cloned()
    }

    /// Run one synchronous integrity pass over every monitored path.
    pub async fn check_integrity(&self) {
        let state = self.state.lock().await;
        for (path, baseline) in &state.baseline {
            self.check_file(path, baseline, state.change_handler.as_ref())
                .await;
        }
    }

    async fn check_file(
        &self,
        path: &str,
        baseline: &FileInfo,
        handler: Option<&ChangeHandler>,
    ) {
        let fs_path = Path::new(path);

        if !fs_path.exists() {
            // Deletion: alert every pass, but keep the baseline so the
            // operator can still inspect what was there.
            self.bus
                .trigger("FILE_DELETED", &format!("File deleted: {}", path))
                .await;
            if let Some(handler) = handler {
                handler(path, baseline, None);
            }
            return;
        }

        let current = match file_info(fs_path) {
            Ok(info) => info,
            Err(e) => {
                self.bus
                    .trigger(
                        "ERROR",
                        &format!("Integrity check failed for {}: {:#}", path, e),
                    )
                    .await;
                return;
            }
        };

        if current.hash == baseline.hash
            && current.size == baseline.size
            && current.last_modified == baseline.last_modified
        {
            return;
        }

        if current.hash != baseline.hash {
            self.bus
                .trigger("FILE_MODIFIED", &format!("File content changed: {}", path))
                .await;
        } else if current.size != baseline.size {
            // Unreachable with a real SHA-256, kept for a stubbed hasher
            self.bus
                .trigger(
                    "FILE_SIZE_CHANGED",
                    &format!(
                        "File size changed: {} (was: {}, now: {})",
                        path, baseline.size, current.size
                    ),
                )
                .await;
        } else {
            self.bus
                .trigger(
                    "FILE_TIME_CHANGED",
                    &format!("File modification time changed: {}", path),
                )
                .await;
        }

        if let Some(handler) = handler {
            handler(path, baseline, Some(&current));
        }
    }

    /// Recompute the baseline for every monitored path, accepting whatever
    /// is on disk now. Missing paths are reported with a `WARNING` but kept.
    pub async fn update_baselines(&self) {
        let mut state = self.state.lock().await;
        let paths: Vec<String> = state.baseline.keys().cloned().collect();
        for path in paths {
            let fs_path = Path::new(&path);
            if fs_path.is_file() {
                match file_info(fs_path) {
                    Ok(info) => {
                        let preview = info.hash[..10.min(info.hash.len())].to_string();
                        state.baseline.insert(path.clone(), info);
                        self.bus
                            .trigger(
                                "INFO",
                                &format!("Baseline updated for file: {} (hash: {}...)", path, preview),
                            )
                            .await;
                    }
                    Err(e) => {
                        self.bus
                            .trigger(
                                "ERROR",
                                &format!("Failed to update baseline for {}: {:#}", path, e),
                            )
                            .await;
                    }
                }
            } else {
                self.bus
                    .trigger(
                        "WARNING",
                        &format!(
                            "Cannot update baseline for {} (missing or not a regular file)",
                            path
                        ),
                    )
                    .await;
            }
        }
    }

    /// Launch the background sweep with the given interval. Idempotent.
    pub fn start(self: &Arc<Self>, interval_secs: u64) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }
        self.should_stop.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            let count = this.monitored_count().await;
            this.bus
                .trigger(
                    "INFO",
                    &format!(
                        "File integrity monitoring started: {} files, every {} seconds",
                        count, interval_secs
                    ),
                )
                .await;
            while !this.should_stop.load(Ordering::SeqCst) {
                this.check_integrity().await;
                // Sleep in 1-second steps so stop() is honored promptly
                for _ in 0..interval_secs {
                    if this.should_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }));
    }

    /// Signal the sweep to stop and wait for it. Idempotent.
    pub async fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
            self.bus
                .trigger("INFO", "File integrity monitoring stopped")
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::testing::RecordingSink;
    use std::sync::Mutex as StdMutex;

    const HASH_A: &str = "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb";
    const HASH_B: &str = "3e23e8160039594a33894f6564e1b1348bbd7a0088d42c4acb73eeaed59c009d";

    async fn make_monitor() -> (Arc<FileIntegrityMonitor>, Arc<RecordingSink>) {
        let bus = Arc::new(AlertBus::new());
        let sink = Arc::new(RecordingSink::new());
        bus.add_sink("rec", sink.clone()).await;
        (Arc::new(FileIntegrityMonitor::new(bus)), sink)
    }

    #[test]
    fn test_hash_file_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();
        assert_eq!(hash_file(&path).unwrap(), HASH_A);
    }

    #[test]
    fn test_hash_file_streams_large_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        // Larger than one read chunk
        std::fs::write(&path, vec![0x41u8; 40_000]).unwrap();
        let hash = hash_file(&path).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_add_file_records_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;

        assert_eq!(monitor.monitored_count().await, 1);
        let info = monitor.baseline_of(&path).await.unwrap();
        assert_eq!(info.hash, HASH_A);
        assert_eq!(info.size, 1);
        assert_eq!(info.path, path.to_string_lossy());
        assert_eq!(sink.count_of("INFO"), 1);
    }

    #[tokio::test]
    async fn test_add_missing_file_rejected() {
        let (monitor, sink) = make_monitor().await;
        monitor.add_file(Path::new("/nonexistent/file")).await;

        assert_eq!(monitor.monitored_count().await, 0);
        assert_eq!(sink.count_of("ERROR"), 1);
    }

    #[tokio::test]
    async fn test_add_directory_rejected_as_file() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, sink) = make_monitor().await;
        monitor.add_file(dir.path()).await;

        assert_eq!(monitor.monitored_count().await, 0);
        assert_eq!(sink.count_of("ERROR"), 1);
    }

    #[tokio::test]
    async fn test_modification_emits_once_and_calls_handler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        let seen: Arc<StdMutex<Vec<(String, Option<String>)>>> =
            Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        monitor
            .set_change_handler(Box::new(move |_, baseline, current| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push((baseline.hash.clone(), current.map(|c| c.hash.clone())));
            }))
            .await;

        monitor.add_file(&path).await;
        std::fs::write(&path, "b").unwrap();
        monitor.check_integrity().await;

        assert_eq!(sink.count_of("FILE_MODIFIED"), 1);
        assert_eq!(sink.count_of("FILE_SIZE_CHANGED"), 0);
        assert_eq!(sink.count_of("FILE_TIME_CHANGED"), 0);

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HASH_A);
        assert_eq!(calls[0].1.as_deref(), Some(HASH_B));
    }

    #[tokio::test]
    async fn test_deletion_keeps_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;
        std::fs::remove_file(&path).unwrap();

        monitor.check_integrity().await;
        assert_eq!(sink.count_of("FILE_DELETED"), 1);
        assert_eq!(monitor.monitored_count().await, 1);

        // Still deleted on the next pass: alerts again, entry still there
        monitor.check_integrity().await;
        assert_eq!(sink.count_of("FILE_DELETED"), 2);
        assert_eq!(monitor.monitored_count().await, 1);
    }

    #[tokio::test]
    async fn test_deletion_calls_handler_without_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, _sink) = make_monitor().await;
        let calls: Arc<StdMutex<Vec<Option<String>>>> = Arc::new(StdMutex::new(Vec::new()));
        let calls_clone = calls.clone();
        monitor
            .set_change_handler(Box::new(move |_, _, current| {
                calls_clone
                    .lock()
                    .unwrap()
                    .push(current.map(|c| c.hash.clone()));
            }))
            .await;

        monitor.add_file(&path).await;
        std::fs::remove_file(&path).unwrap();
        monitor.check_integrity().await;

        assert_eq!(calls.lock().unwrap().as_slice(), &[None]);
    }

    #[tokio::test]
    async fn test_mtime_only_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;

        // Same content and size, different mtime
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000))
            .unwrap();
        drop(file);

        monitor.check_integrity().await;
        assert_eq!(sink.count_of("FILE_TIME_CHANGED"), 1);
        assert_eq!(sink.count_of("FILE_MODIFIED"), 0);
    }

    #[tokio::test]
    async fn test_unchanged_file_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;
        let before = sink.alerts().len();
        monitor.check_integrity().await;
        assert_eq!(sink.alerts().len(), before);
    }

    #[tokio::test]
    async fn test_update_baselines_accepts_new_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;
        std::fs::write(&path, "b").unwrap();

        monitor.update_baselines().await;
        assert_eq!(monitor.baseline_of(&path).await.unwrap().hash, HASH_B);

        let before = sink.count_of("FILE_MODIFIED");
        monitor.check_integrity().await;
        assert_eq!(sink.count_of("FILE_MODIFIED"), before);
    }

    #[tokio::test]
    async fn test_update_baselines_warns_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;
        std::fs::remove_file(&path).unwrap();

        monitor.update_baselines().await;
        assert_eq!(sink.count_of("WARNING"), 1);
        assert_eq!(monitor.monitored_count().await, 1);
        // Stale baseline is preserved
        assert_eq!(monitor.baseline_of(&path).await.unwrap().hash, HASH_A);
    }

    #[tokio::test]
    async fn test_add_remove_add_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, _sink) = make_monitor().await;
        monitor.add_file(&path).await;
        let first = monitor.baseline_of(&path).await.unwrap();

        monitor.remove_file(&path).await;
        assert_eq!(monitor.monitored_count().await, 0);

        monitor.add_file(&path).await;
        let second = monitor.baseline_of(&path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_add_directory_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one"), "1").unwrap();
        std::fs::write(dir.path().join("two"), "2").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/three"), "3").unwrap();

        let (monitor, _sink) = make_monitor().await;
        monitor.add_directory(dir.path(), false).await;
        assert_eq!(monitor.monitored_count().await, 2);
    }

    #[tokio::test]
    async fn test_add_directory_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one"), "1").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/two"), "2").unwrap();

        let (monitor, _sink) = make_monitor().await;
        monitor.add_directory(dir.path(), true).await;
        assert_eq!(monitor.monitored_count().await, 2);
    }

    #[tokio::test]
    async fn test_bad_file_does_not_abort_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let fine = dir.path().join("fine");
        std::fs::write(&gone, "x").unwrap();
        std::fs::write(&fine, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&gone).await;
        monitor.add_file(&fine).await;

        std::fs::remove_file(&gone).unwrap();
        std::fs::write(&fine, "b").unwrap();
        monitor.check_integrity().await;

        // Both findings surface in one pass
        assert_eq!(sink.count_of("FILE_DELETED"), 1);
        assert_eq!(sink.count_of("FILE_MODIFIED"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_loop_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        std::fs::write(&path, "a").unwrap();

        let (monitor, sink) = make_monitor().await;
        monitor.add_file(&path).await;
        monitor.start(1);
        // Second start is a no-op
        monitor.start(1);

        std::fs::write(&path, "b").unwrap();
        sleep(Duration::from_millis(2500)).await;
        monitor.stop().await;
        monitor.stop().await;

        assert!(sink.count_of("FILE_MODIFIED") >= 1);
    }
}
