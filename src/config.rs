//! Configuration loading and serialization.
//!
//! Defines the TOML configuration schema for Vigil. The root [`Config`]
//! struct has one section per subsystem (auth log tailer, file integrity,
//! behavior analyzer, alert sinks, firewall response).
//!
//! All sections implement `Default` and use `#[serde(default)]` so missing
//! fields and sections fall back to the daemon's built-in defaults. Config is
//! loaded from `/etc/vigil/config.toml` unless a path is given on the command
//! line; a missing file is not an error, the defaults simply apply.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration struct, deserialized from TOML.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub auth_log: AuthLogConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
}

/// General daemon settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneralConfig {
    /// Path of the append-only alert log written by the file sink
    #[serde(default = "default_alert_log")]
    pub alert_log: String,
}

fn default_alert_log() -> String {
    "vigil_alerts.log".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            alert_log: default_alert_log(),
        }
    }
}

/// Authentication log tailing and brute-force detection.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_auth_log_path")]
    pub path: String,
    /// Tried when `path` does not exist (RHEL-style hosts)
    #[serde(default = "default_auth_log_fallback")]
    pub fallback_path: String,
    #[serde(default = "default_bruteforce_threshold")]
    pub bruteforce_threshold: usize,
    #[serde(default = "default_bruteforce_window")]
    pub bruteforce_window_secs: i64,
}

fn default_true() -> bool {
    true
}
fn default_auth_log_path() -> String {
    "/var/log/auth.log".to_string()
}
fn default_auth_log_fallback() -> String {
    "/var/log/secure".to_string()
}
fn default_bruteforce_threshold() -> usize {
    5
}
fn default_bruteforce_window() -> i64 {
    300
}

impl Default for AuthLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_auth_log_path(),
            fallback_path: default_auth_log_fallback(),
            bruteforce_threshold: default_bruteforce_threshold(),
            bruteforce_window_secs: default_bruteforce_window(),
        }
    }
}

/// File integrity monitoring.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IntegrityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps
    #[serde(default = "default_integrity_interval")]
    pub interval_secs: u64,
    /// Individual files to baseline at startup
    #[serde(default = "default_integrity_files")]
    pub files: Vec<String>,
    /// Directories whose regular files are baselined at startup
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
}

fn default_integrity_interval() -> u64 {
    300
}

/// SSH and PAM configuration are the files an intruder touches first.
fn default_integrity_files() -> Vec<String> {
    vec![
        "/etc/ssh/sshd_config".to_string(),
        "/etc/pam.d/sshd".to_string(),
        "/etc/pam.d/common-auth".to_string(),
        "/etc/hosts.allow".to_string(),
        "/etc/hosts.deny".to_string(),
    ]
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_integrity_interval(),
            files: default_integrity_files(),
            directories: Vec::new(),
            recursive: false,
        }
    }
}

/// Behavior analyzer settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BehaviorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_active_start_hour")]
    pub active_start_hour: i64,
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: i64,
    /// Extra suspicious-command regexes added to the built-in set
    #[serde(default)]
    pub extra_suspicious_commands: Vec<String>,
    /// Replaces the built-in privileged-command set when non-empty
    #[serde(default)]
    pub privileged_commands: Vec<String>,
    /// username -> allowed source IPs; logins from elsewhere are flagged
    #[serde(default)]
    pub allowed_ips: HashMap<String, Vec<String>>,
}

fn default_active_start_hour() -> i64 {
    8
}
fn default_active_end_hour() -> i64 {
    20
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            active_start_hour: default_active_start_hour(),
            active_end_hour: default_active_end_hour(),
            extra_suspicious_commands: Vec::new(),
            privileged_commands: Vec::new(),
            allowed_ips: HashMap::new(),
        }
    }
}

/// Email sink (stub transport).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default = "default_email_subject_prefix")]
    pub subject_prefix: String,
}

fn default_email_subject_prefix() -> String {
    "Vigil Alert".to_string()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            from: String::new(),
            to: String::new(),
            subject_prefix: default_email_subject_prefix(),
        }
    }
}

/// UNIX-socket notifier forwarding high-severity alerts to a companion bot.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_notifier_socket")]
    pub socket_path: String,
    /// Alerts below this severity are not forwarded
    #[serde(default = "default_notifier_min_severity")]
    pub min_severity: u8,
}

fn default_notifier_socket() -> String {
    crate::sinks::socket::DEFAULT_SOCKET_PATH.to_string()
}
fn default_notifier_min_severity() -> u8 {
    crate::sinks::socket::DEFAULT_MIN_SEVERITY
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket_path: default_notifier_socket(),
            min_severity: default_notifier_min_severity(),
        }
    }
}

/// Firewall response: automatic blocking of brute-force sources.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FirewallConfig {
    #[serde(default)]
    pub block_on_bruteforce: bool,
}

impl Config {
    /// Load config from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Load config from `path`, falling back to defaults when the file does
    /// not exist. A file that exists but fails to parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.auth_log.enabled);
        assert_eq!(config.auth_log.path, "/var/log/auth.log");
        assert_eq!(config.auth_log.bruteforce_threshold, 5);
        assert_eq!(config.auth_log.bruteforce_window_secs, 300);
        assert_eq!(config.integrity.interval_secs, 300);
        assert_eq!(config.behavior.active_start_hour, 8);
        assert_eq!(config.behavior.active_end_hour, 20);
        assert!(!config.email.enabled);
        assert!(!config.notifier.enabled);
        assert!(!config.firewall.block_on_bruteforce);
    }

    #[test]
    fn test_default_integrity_watches_sshd_config() {
        let config = IntegrityConfig::default();
        assert!(config.files.iter().any(|f| f == "/etc/ssh/sshd_config"));
        assert!(config.files.iter().any(|f| f.starts_with("/etc/pam.d/")));
    }

    #[test]
    fn test_partial_section_fills_remaining_fields() {
        let config: Config = toml::from_str(
            r#"
            [auth_log]
            bruteforce_threshold = 3
        "#,
        )
        .unwrap();
        assert_eq!(config.auth_log.bruteforce_threshold, 3);
        // Untouched fields keep their defaults
        assert_eq!(config.auth_log.bruteforce_window_secs, 300);
        assert!(config.auth_log.enabled);
    }

    #[test]
    fn test_allowed_ips_map() {
        let config: Config = toml::from_str(
            r#"
            [behavior.allowed_ips]
            alice = ["10.0.0.1", "10.0.0.2"]
            bob = []
        "#,
        )
        .unwrap();
        assert_eq!(config.behavior.allowed_ips["alice"].len(), 2);
        assert!(config.behavior.allowed_ips["bob"].is_empty());
    }

    #[test]
    fn test_notifier_defaults() {
        let config = NotifierConfig::default();
        assert_eq!(config.socket_path, "/var/run/hids/alert.sock");
        assert_eq!(config.min_severity, 3);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.auth_log.bruteforce_threshold = 7;
        config.notifier.enabled = true;
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.auth_log.bruteforce_threshold, 7);
        assert!(reloaded.notifier.enabled);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/vigil.toml")).unwrap();
        assert!(config.auth_log.enabled);
    }

    #[test]
    fn test_load_or_default_rejects_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not toml").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }
}
