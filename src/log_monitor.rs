//! Authentication log tailer and brute-force detector.
//!
//! Follows the SSH auth log in real time (seek to end, poll for new lines),
//! classifies each line against a set of compiled regexes, and promotes
//! repeated failures from a single source IP into a `BRUTE_FORCE` alert
//! using a sliding time window.
//!
//! Classification tries `invalid_user` before `failed_login` because the
//! former's pattern is a stricter specialization of the latter.
//!
//! Login and logout events are additionally forwarded over an optional
//! channel so the behavior analyzer can track interactive sessions off the
//! same log.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::trace;

use crate::bus::AlertBus;

/// Default number of failures that promotes to `BRUTE_FORCE`.
pub const DEFAULT_BRUTEFORCE_THRESHOLD: usize = 5;
/// Default sliding window, in seconds.
pub const DEFAULT_BRUTEFORCE_WINDOW_SECS: i64 = 300;

const EOF_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Kind of event parsed from a single auth-log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshEventKind {
    FailedLogin,
    SuccessfulLogin,
    Logout,
    InvalidUser,
    #[allow(dead_code)]
    BruteforceAttempt,
    Unknown,
}

/// One parsed auth-log line.
#[derive(Debug, Clone)]
pub struct SshEvent {
    pub kind: SshEventKind,
    /// Timestamp string as captured from the line
    pub timestamp: String,
    pub username: String,
    /// Empty for logout lines, which carry no address
    pub source_ip: String,
    pub raw_message: String,
}

impl SshEvent {
    fn unknown(line: &str) -> Self {
        Self {
            kind: SshEventKind::Unknown,
            timestamp: String::new(),
            username: String::new(),
            source_ip: String::new(),
            raw_message: line.to_string(),
        }
    }
}

/// Login/logout notifications forwarded to the behavior analyzer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Login { username: String, source_ip: String },
    Logout { username: String, source_ip: String },
}

/// Compiled classification patterns for standard OpenSSH syslog output.
///
/// Capture groups are `(timestamp)(username)(source_ip)` for the first three
/// kinds and `(timestamp)(username)` for logout.
pub struct LogPatterns {
    failed_login: Regex,
    invalid_user: Regex,
    successful_login: Regex,
    logout: Regex,
}

impl Default for LogPatterns {
    fn default() -> Self {
        Self {
            failed_login: Regex::new(
                r"(\w+\s+\d+\s+\d+:\d+:\d+).*sshd\[\d+\]: Failed password for (.*) from (\d+\.\d+\.\d+\.\d+) port \d+",
            )
            .unwrap(),
            invalid_user: Regex::new(
                r"(\w+\s+\d+\s+\d+:\d+:\d+).*sshd\[\d+\]: Failed password for invalid user (.*) from (\d+\.\d+\.\d+\.\d+) port \d+",
            )
            .unwrap(),
            successful_login: Regex::new(
                r"(\w+\s+\d+\s+\d+:\d+:\d+).*sshd\[\d+\]: Accepted password for (.*) from (\d+\.\d+\.\d+\.\d+) port \d+",
            )
            .unwrap(),
            logout: Regex::new(
                r"(\w+\s+\d+\s+\d+:\d+:\d+).*sshd\[\d+\]: pam_unix\(sshd:session\): session closed for user (.*)",
            )
            .unwrap(),
        }
    }
}

impl LogPatterns {
    /// Classify one log line. Unmatched lines come back as `Unknown`.
    pub fn classify(&self, line: &str) -> SshEvent {
        // invalid_user first: its pattern is a superset match of failed_login
        if let Some(caps) = self.invalid_user.captures(line) {
            return SshEvent {
                kind: SshEventKind::InvalidUser,
                timestamp: caps[1].to_string(),
                username: caps[2].to_string(),
                source_ip: caps[3].to_string(),
                raw_message: line.to_string(),
            };
        }
        if let Some(caps) = self.failed_login.captures(line) {
            return SshEvent {
                kind: SshEventKind::FailedLogin,
                timestamp: caps[1].to_string(),
                username: caps[2].to_string(),
                source_ip: caps[3].to_string(),
                raw_message: line.to_string(),
            };
        }
        if let Some(caps) = self.successful_login.captures(line) {
            return SshEvent {
                kind: SshEventKind::SuccessfulLogin,
                timestamp: caps[1].to_string(),
                username: caps[2].to_string(),
                source_ip: caps[3].to_string(),
                raw_message: line.to_string(),
            };
        }
        if let Some(caps) = self.logout.captures(line) {
            return SshEvent {
                kind: SshEventKind::Logout,
                timestamp: caps[1].to_string(),
                username: caps[2].trim_end().to_string(),
                source_ip: String::new(),
                raw_message: line.to_string(),
            };
        }
        SshEvent::unknown(line)
    }

    /// Replace one named pattern. Returns an error for unknown names or
    /// regexes that fail to compile; the previous pattern stays in place.
    pub fn set(&mut self, name: &str, pattern: &str) -> Result<(), regex::Error> {
        let compiled = Regex::new(pattern)?;
        match name {
            "failed_login" => self.failed_login = compiled,
            "invalid_user" => self.invalid_user = compiled,
            "successful_login" => self.successful_login = compiled,
            "logout" => self.logout = compiled,
            _ => {}
        }
        Ok(())
    }
}

/// Per-source-IP sliding window of failed-attempt timestamps (UNIX seconds).
///
/// After every insertion all stored timestamps are within `window_secs` of
/// the supplied `now`, so the map never grows beyond what the window holds.
#[derive(Default)]
pub struct FailedAttemptWindow {
    attempts: HashMap<String, Vec<i64>>,
}

impl FailedAttemptWindow {
    /// Record a failure from `source_ip` at time `now`, expire entries older
    /// than `window_secs`, and return how many attempts remain in the window.
    pub fn record(&mut self, source_ip: &str, now: i64, window_secs: i64) -> usize {
        let attempts = self.attempts.entry(source_ip.to_string()).or_default();
        attempts.push(now);
        attempts.retain(|&t| now - t <= window_secs);
        attempts.len()
    }

    #[cfg(test)]
    fn timestamps(&self, source_ip: &str) -> &[i64] {
        self.attempts.get(source_ip).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

struct MonitorState {
    patterns: LogPatterns,
    threshold: usize,
    window_secs: i64,
    window: FailedAttemptWindow,
}

/// Follow-mode reader of the authentication log.
///
/// `start` launches the tail loop on a background task; `stop` is idempotent
/// and joins it. Threshold and pattern setters take effect on the next line.
pub struct LogMonitor {
    log_path: PathBuf,
    bus: Arc<AlertBus>,
    state: Mutex<MonitorState>,
    session_tx: Option<mpsc::Sender<SessionEvent>>,
    should_stop: AtomicBool,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LogMonitor {
    pub fn new(log_path: PathBuf, bus: Arc<AlertBus>) -> Self {
        Self {
            log_path,
            bus,
            state: Mutex::new(MonitorState {
                patterns: LogPatterns::default(),
                threshold: DEFAULT_BRUTEFORCE_THRESHOLD,
                window_secs: DEFAULT_BRUTEFORCE_WINDOW_SECS,
                window: FailedAttemptWindow::default(),
            }),
            session_tx: None,
            should_stop: AtomicBool::new(false),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Forward login/logout events to `tx` (for the behavior analyzer).
    pub fn set_session_events(&mut self, tx: mpsc::Sender<SessionEvent>) {
        self.session_tx = Some(tx);
    }

    /// Set the failure count and window that promote to `BRUTE_FORCE`.
    pub async fn set_bruteforce_threshold(&self, failed_attempts: usize, window_secs: i64) {
        let mut state = self.state.lock().await;
        state.threshold = failed_attempts;
        state.window_secs = window_secs;
    }

    /// Replace classification patterns by name. A pattern that fails to
    /// compile is rejected with an `ERROR` alert and the previous one kept.
    pub async fn set_regex_patterns(&self, patterns: &[(&str, &str)]) {
        let mut state = self.state.lock().await;
        for (name, pattern) in patterns {
            if let Err(e) = state.patterns.set(name, pattern) {
                self.bus
                    .trigger("ERROR", &format!("Invalid regex for {}: {}", name, e))
                    .await;
            }
        }
    }

    /// Launch the tail loop. Calling `start` while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }
        self.should_stop.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            this.tail_log().await;
        }));
    }

    /// Signal the tail loop to stop and wait for it. Idempotent.
    pub async fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn tail_log(&self) {
        let mut file = match File::open(&self.log_path) {
            Ok(f) => f,
            Err(e) => {
                self.bus
                    .trigger(
                        "ERROR",
                        &format!("Cannot open log file: {}: {}", self.log_path.display(), e),
                    )
                    .await;
                return;
            }
        };

        // Only new entries matter; historic content is skipped.
        if let Err(e) = file.seek(SeekFrom::End(0)) {
            self.bus
                .trigger(
                    "ERROR",
                    &format!("Cannot seek log file: {}: {}", self.log_path.display(), e),
                )
                .await;
            return;
        }

        let mut reader = BufReader::new(file);
        let mut line = String::new();

        while !self.should_stop.load(Ordering::SeqCst) {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    // At EOF: wait for the log to grow
                    sleep(EOF_POLL_INTERVAL).await;
                }
                Ok(_) => {
                    let trimmed = line.trim_end_matches(|c| c == '\n' || c == '\r');
                    if !trimmed.is_empty() {
                        self.handle_line(trimmed).await;
                    }
                }
                Err(e) => {
                    self.bus
                        .trigger("ERROR", &format!("Error reading log file: {}", e))
                        .await;
                    sleep(EOF_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        let event = {
            let state = self.state.lock().await;
            state.patterns.classify(line)
        };

        match event.kind {
            SshEventKind::FailedLogin | SshEventKind::InvalidUser => {
                let now = chrono::Local::now().timestamp();
                let (count, threshold, window_secs) = {
                    let mut state = self.state.lock().await;
                    let window_secs = state.window_secs;
                    let count = state.window.record(&event.source_ip, now, window_secs);
                    (count, state.threshold, window_secs)
                };
                if count >= threshold {
                    self.bus
                        .trigger(
                            "BRUTE_FORCE",
                            &format!(
                                "Brute force attack from IP={} with {} failed attempts in the last {} seconds",
                                event.source_ip, count, window_secs
                            ),
                        )
                        .await;
                } else {
                    self.bus
                        .trigger(
                            "FAILED_LOGIN",
                            &format!(
                                "Failed login attempt: user={}, IP={}",
                                event.username, event.source_ip
                            ),
                        )
                        .await;
                }
            }
            SshEventKind::SuccessfulLogin => {
                self.bus
                    .trigger(
                        "SUCCESS_LOGIN",
                        &format!(
                            "Successful login: user={}, IP={}",
                            event.username, event.source_ip
                        ),
                    )
                    .await;
                self.forward_session(SessionEvent::Login {
                    username: event.username.clone(),
                    source_ip: event.source_ip.clone(),
                })
                .await;
            }
            SshEventKind::Logout => {
                // Observable but silent: no alert for ordinary logouts
                self.forward_session(SessionEvent::Logout {
                    username: event.username.clone(),
                    source_ip: event.source_ip.clone(),
                })
                .await;
            }
            SshEventKind::Unknown => {
                trace!(line = %event.raw_message, "unclassified auth log line");
            }
            SshEventKind::BruteforceAttempt => {}
        }
    }

    async fn forward_session(&self, event: SessionEvent) {
        if let Some(tx) = &self.session_tx {
            let _ = tx.send(event).await;
        }
    }
}
