//! Interactive-session behavior analyzer.
//!
//! Tracks active sessions keyed by `(user, source IP)` and alerts on
//! anomalies: suspicious command patterns, privileged command use, logins at
//! unusual hours or from unexpected addresses, idle sessions, and
//! command-rate spikes. Session registration is driven by the auth-log
//! tailer's [`SessionEvent`](crate::log_monitor::SessionEvent) stream;
//! commands are fed in by the host program.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Local, Timelike};
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bus::AlertBus;
use crate::log_monitor::SessionEvent;

/// Sweep cadence for the background anomaly checks.
const SWEEP_INTERVAL_SECS: u64 = 60;
/// Idle time after which a session is flagged, in seconds.
const INACTIVE_AFTER_SECS: i64 = 3600;
/// Minimum command count before the rate check applies.
const RATE_CHECK_MIN_COMMANDS: usize = 5;
/// Commands per minute above which a session is flagged.
const RATE_LIMIT_PER_MINUTE: f64 = 20.0;

/// Command patterns treated as suspicious. Each entry is a regex matched
/// anywhere in the command line.
const DEFAULT_SUSPICIOUS_PATTERNS: &[&str] = &[
    "wget",
    "curl",
    "nc",
    "netcat",
    "ncat",
    "telnet",
    "ssh-keygen",
    "chmod 777",
    "rm -rf /*",
    "dd if=/dev/zero",
    ":(){ :|:& };:",
    "/dev/tcp",
    ">&",
    r"\.\./\.\./",
    "base64 --decode",
    "eval",
    "exec",
];

/// Command heads treated as privileged, matched as `^cmd(\s|$)`.
const DEFAULT_PRIVILEGED_COMMANDS: &[&str] = &[
    "sudo",
    "su",
    "passwd",
    "chown",
    "chmod",
    "visudo",
    "usermod",
    "groupmod",
    "useradd",
    "userdel",
    "adduser",
    "mount",
    "umount",
    "fdisk",
    "mkfs",
    "systemctl",
    "iptables",
    "firewall-cmd",
    "tcpdump",
    "wireshark",
];

/// In-memory record of a logged-in user, keyed by `"{user}_{ip}"`.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub username: String,
    pub source_ip: String,
    /// UNIX seconds of login
    pub login_time: i64,
    /// UNIX seconds of the most recent command or login
    pub last_activity_time: i64,
    pub commands: Vec<String>,
}

/// True when `hour` falls outside the `start..end` active window.
///
/// The start hour is inclusive, the end hour exclusive. Windows with
/// `start > end` wrap past midnight (20..8 is active overnight).
fn is_unusual_hour(hour: u32, start_hour: u32, end_hour: u32) -> bool {
    if start_hour < end_hour {
        hour < start_hour || hour >= end_hour
    } else {
        hour < start_hour && hour >= end_hour
    }
}

/// True when `command` starts with `head` as a whole word.
fn matches_command_head(command: &str, head: &str) -> bool {
    command
        .strip_prefix(head)
        .map(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .unwrap_or(false)
}

struct BehaviorState {
    sessions: HashMap<String, UserSession>,
    /// (source, compiled) pairs; source kept for removal by pattern text
    suspicious: Vec<(String, Regex)>,
    privileged: Vec<String>,
    allowed_ips: HashMap<String, HashSet<String>>,
    active_start_hour: u32,
    active_end_hour: u32,
}

impl BehaviorState {
    fn session_key(username: &str, source_ip: &str) -> String {
        format!("{}_{}", username, source_ip)
    }
}

/// Session tracker and anomaly detector.
pub struct BehaviorAnalyzer {
    bus: Arc<AlertBus>,
    state: Mutex<BehaviorState>,
    should_stop: AtomicBool,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BehaviorAnalyzer {
    pub fn new(bus: Arc<AlertBus>) -> Self {
        let suspicious = DEFAULT_SUSPICIOUS_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok().map(|re| (p.to_string(), re)))
            .collect();
        Self {
            bus,
            state: Mutex::new(BehaviorState {
                sessions: HashMap::new(),
                suspicious,
                privileged: DEFAULT_PRIVILEGED_COMMANDS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                allowed_ips: HashMap::new(),
                active_start_hour: 8,
                active_end_hour: 20,
            }),
            should_stop: AtomicBool::new(false),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Record a login and immediately evaluate source/time anomalies.
    pub async fn register_login(&self, username: &str, source_ip: &str) {
        let now = Local::now();
        self.register_login_at(username, source_ip, now.timestamp(), now.hour())
            .await;
    }

    async fn register_login_at(&self, username: &str, source_ip: &str, now: i64, hour: u32) {
        let mut alerts: Vec<(&str, String)> = Vec::new();
        {
            let mut state = self.state.lock().await;
            let key = BehaviorState::session_key(username, source_ip);
            state.sessions.insert(
                key,
                UserSession {
                    username: username.to_string(),
                    source_ip: source_ip.to_string(),
                    login_time: now,
                    last_activity_time: now,
                    commands: Vec::new(),
                },
            );

            let unusual_source = state
                .allowed_ips
                .get(username)
                .map(|allowed| !allowed.is_empty() && !allowed.contains(source_ip))
                .unwrap_or(false);
            if unusual_source {
                alerts.push((
                    "UNUSUAL_SOURCE",
                    format!(
                        "Login from unusual IP address: user={}, IP={}",
                        username, source_ip
                    ),
                ));
            }

            if is_unusual_hour(hour, state.active_start_hour, state.active_end_hour) {
                alerts.push((
                    "UNUSUAL_TIME",
                    format!(
                        "Login at unusual time: user={}, IP={}",
                        username, source_ip
                    ),
                ));
            }
        }
        for (ty, message) in alerts {
            self.bus.trigger(ty, &message).await;
        }
    }

    /// Erase the session for `(username, source_ip)`. No-op if absent.
    pub async fn register_logout(&self, username: &str, source_ip: &str) {
        let mut state = self.state.lock().await;
        let key = BehaviorState::session_key(username, source_ip);
        state.sessions.remove(&key);
    }

    /// Append a command to every active session of `username` and scan it
    /// against the suspicious and privileged sets. Emits `NO_SESSION` exactly
    /// once when the user has no session at all.
    pub async fn register_command(&self, username: &str, command: &str) {
        self.register_command_at(username, command, Local::now().timestamp())
            .await;
    }

    async fn register_command_at(&self, username: &str, command: &str, now: i64) {
        let mut alerts: Vec<(&str, String)> = Vec::new();
        {
            let mut state = self.state.lock().await;
            let BehaviorState {
                sessions,
                suspicious,
                privileged,
                ..
            } = &mut *state;

            let mut session_found = false;
            for session in sessions.values_mut() {
                if session.username != username {
                    continue;
                }
                session.commands.push(command.to_string());
                session.last_activity_time = now;
                session_found = true;

                if suspicious.iter().any(|(_, re)| re.is_match(command)) {
                    alerts.push((
                        "SUSPICIOUS_COMMAND",
                        format!(
                            "Suspicious command detected: user={}, IP={}, command=\"{}\"",
                            username, session.source_ip, command
                        ),
                    ));
                }

                if privileged.iter().any(|p| matches_command_head(command, p)) {
                    alerts.push((
                        "PRIVILEGED_COMMAND",
                        format!(
                            "Privileged command detected: user={}, IP={}, command=\"{}\"",
                            username, session.source_ip, command
                        ),
                    ));
                }
            }

            if !session_found {
                alerts.push((
                    "NO_SESSION",
                    format!(
                        "Command from user with no active session: user={}, command=\"{}\"",
                        username, command
                    ),
                ));
            }
        }
        for (ty, message) in alerts {
            self.bus.trigger(ty, &message).await;
        }
    }

    /// Add a suspicious-command regex. Patterns that fail to compile are
    /// rejected with an `ERROR` alert.
    pub async fn add_suspicious_command(&self, pattern: &str) {
        match Regex::new(pattern) {
            Ok(re) => {
                let mut state = self.state.lock().await;
                state.suspicious.push((pattern.to_string(), re));
            }
            Err(e) => {
                self.bus
                    .trigger(
                        "ERROR",
                        &format!("Invalid suspicious-command regex \"{}\": {}", pattern, e),
                    )
                    .await;
            }
        }
    }

    /// Remove a suspicious-command pattern by its source text.
    pub async fn remove_suspicious_command(&self, pattern: &str) {
        let mut state = self.state.lock().await;
        state.suspicious.retain(|(src, _)| src != pattern);
    }

    /// Replace the privileged-command set.
    pub async fn set_privileged_commands(&self, commands: Vec<String>) {
        let mut state = self.state.lock().await;
        state.privileged = commands;
    }

    /// Set the active-hours window. Hours are clamped into 0..=23.
    pub async fn set_active_time_window(&self, start_hour: i64, end_hour: i64) {
        let mut state = self.state.lock().await;
        state.active_start_hour = start_hour.clamp(0, 23) as u32;
        state.active_end_hour = end_hour.clamp(0, 23) as u32;
    }

    /// Replace the allowed source IPs for a user. An empty set disables the
    /// unusual-source check for that user.
    pub async fn set_allowed_source_ips(&self, username: &str, ips: Vec<String>) {
        let mut state = self.state.lock().await;
        state
            .allowed_ips
            .insert(username.to_string(), ips.into_iter().collect());
    }

    /// Run one synchronous sweep over all sessions.
    pub async fn check_behavior(&self) {
        self.check_behavior_at(Local::now().timestamp()).await;
    }

    async fn check_behavior_at(&self, now: i64) {
        let mut alerts: Vec<(&str, String)> = Vec::new();
        {
            let state = self.state.lock().await;
            for session in state.sessions.values() {
                let idle = now - session.last_activity_time;
                if idle > INACTIVE_AFTER_SECS {
                    alerts.push((
                        "INACTIVE_SESSION",
                        format!(
                            "Prolonged inactivity in session: user={}, IP={}, idle={} seconds",
                            session.username, session.source_ip, idle
                        ),
                    ));
                }

                if session.commands.len() >= RATE_CHECK_MIN_COMMANDS {
                    let duration = now - session.login_time;
                    if duration > 0 {
                        let per_minute =
                            session.commands.len() as f64 / (duration as f64 / 60.0);
                        if per_minute > RATE_LIMIT_PER_MINUTE {
                            alerts.push((
                                "HIGH_ACTIVITY",
                                format!(
                                    "Unusually high activity: user={}, IP={}, commands per minute={:.2}",
                                    session.username, session.source_ip, per_minute
                                ),
                            ));
                        }
                    }
                }
            }
        }
        for (ty, message) in alerts {
            self.bus.trigger(ty, &message).await;
        }
    }

    /// Launch the periodic sweep. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }
        self.should_stop.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            this.bus.trigger("INFO", "Behavior analyzer started").await;
            while !this.should_stop.load(Ordering::SeqCst) {
                this.check_behavior().await;
                for _ in 0..SWEEP_INTERVAL_SECS {
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
            self.bus.trigger("INFO", "Behavior analyzer stopped").await;
        }
    }

    /// Drive session registration from the log tailer's event stream.
    pub fn consume_session_events(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Login {
                        username,
                        source_ip,
                    } => this.register_login(&username, &source_ip).await,
                    SessionEvent::Logout {
                        username,
                        source_ip,
                    } => this.register_logout(&username, &source_ip).await,
                }
            }
        })
    }
}
