//! Vigil — host-based intrusion detection daemon.
//!
//! Main entry point: parses the (tiny) command line, loads the TOML config,
//! wires the alert bus and sinks, and starts the three detection engines:
//!
//! - **log_monitor**: tails the SSH auth log, classifies lines, and promotes
//!   repeated failures into brute-force alerts
//! - **file_integrity**: polls a baseline of security-critical files for
//!   content/size/mtime changes and deletions
//! - **behavior**: tracks interactive sessions and flags suspicious commands,
//!   privileged commands, odd login hours/sources, idle sessions, and
//!   command-rate spikes
//!
//! Alerts flow through the shared [`bus::AlertBus`] to every configured sink
//! (alert log file, email stub, UNIX-socket notifier, optional firewall
//! responder). Shutdown is cooperative: Ctrl-C sets the detectors' stop flags
//! and each background task is joined.

mod alerts;
mod behavior;
mod bus;
mod config;
mod file_integrity;
mod firewall;
mod log_monitor;
mod sinks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::warn;

use behavior::BehaviorAnalyzer;
use bus::AlertBus;
use config::Config;
use file_integrity::FileIntegrityMonitor;
use firewall::{FirewallResponder, IptablesFilter};
use log_monitor::LogMonitor;
use sinks::email::EmailSink;
use sinks::file::FileSink;
use sinks::socket::SocketNotifier;

const DEFAULT_CONFIG_PATH: &str = "/etc/vigil/config.toml";

fn print_help() {
    eprintln!(
        r#"Vigil — host-based intrusion detection daemon

USAGE:
    vigil [COMMAND] [CONFIG]

COMMANDS:
    run [CONFIG]    Start the daemon (default). CONFIG defaults to
                    /etc/vigil/config.toml; missing file means built-in defaults.
    help            Show this help message
    version         Show version info

MONITORS:
    auth log        Brute-force detection on the SSH authentication log
    file integrity  SHA-256 baseline checks of critical files
    behavior        Session tracking and command anomaly checks

Alerts are appended to the configured alert log and, when enabled, forwarded
to the notification socket and the email sink. Set RUST_LOG for diagnostics.
"#
    );
}

fn print_version() {
    eprintln!("Vigil v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Host-based intrusion detection daemon");
}

/// Pick the auth log to tail: the configured path, or the fallback when the
/// primary does not exist on this host.
fn resolve_auth_log(config: &config::AuthLogConfig) -> Option<PathBuf> {
    let primary = PathBuf::from(&config.path);
    if primary.exists() {
        return Some(primary);
    }
    let fallback = PathBuf::from(&config.fallback_path);
    if fallback.exists() {
        return Some(fallback);
    }
    None
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let subcommand = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    match subcommand {
        "help" | "--help" | "-h" => {
            print_help();
            return Ok(());
        }
        "version" | "--version" | "-V" => {
            print_version();
            return Ok(());
        }
        _ => {}
    }

    // `vigil run /path/config.toml` or `vigil /path/config.toml`
    let config_path = args
        .iter()
        .skip(1)
        .find(|a| a.as_str() != "run")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if unsafe { libc::getuid() } != 0 {
        eprintln!(
            "WARNING: Vigil is running without root privileges. \
             Some monitors may not see their sources."
        );
    }

    let config = Config::load_or_default(&config_path)?;
    eprintln!("Vigil v{} starting", env!("CARGO_PKG_VERSION"));

    // ── Alert bus and sinks ─────────────────────────────────────────────
    let bus = Arc::new(AlertBus::new());

    let file_sink = FileSink::open(Path::new(&config.general.alert_log))?;
    bus.add_sink("file", Arc::new(file_sink)).await;

    if config.email.enabled {
        let email = EmailSink::new(
            &config.email.smtp_server,
            &config.email.from,
            &config.email.to,
            &config.email.subject_prefix,
        );
        bus.add_sink("email", Arc::new(email)).await;
    }

    if config.notifier.enabled {
        let notifier = SocketNotifier::new(
            PathBuf::from(&config.notifier.socket_path),
            config.notifier.min_severity,
        );
        bus.add_sink("socket", Arc::new(notifier)).await;
    }

    if config.firewall.block_on_bruteforce {
        let responder = FirewallResponder::new(Arc::new(IptablesFilter));
        bus.add_sink("firewall", Arc::new(responder)).await;
        eprintln!("Firewall response enabled: brute-force sources will be blocked");
    }

    // ── Behavior analyzer ───────────────────────────────────────────────
    let analyzer = if config.behavior.enabled {
        let analyzer = Arc::new(BehaviorAnalyzer::new(bus.clone()));
        analyzer
            .set_active_time_window(
                config.behavior.active_start_hour,
                config.behavior.active_end_hour,
            )
            .await;
        for (user, ips) in &config.behavior.allowed_ips {
            analyzer.set_allowed_source_ips(user, ips.clone()).await;
        }
        for pattern in &config.behavior.extra_suspicious_commands {
            analyzer.add_suspicious_command(pattern).await;
        }
        if !config.behavior.privileged_commands.is_empty() {
            analyzer
                .set_privileged_commands(config.behavior.privileged_commands.clone())
                .await;
        }
        Some(analyzer)
    } else {
        None
    };

    // ── Auth log tailer ─────────────────────────────────────────────────
    let log_monitor = if config.auth_log.enabled {
        match resolve_auth_log(&config.auth_log) {
            Some(path) => {
                eprintln!("Tailing authentication log: {}", path.display());
                let mut monitor = LogMonitor::new(path, bus.clone());
                if let Some(analyzer) = &analyzer {
                    // Feed logins/logouts from the auth log into the
                    // behavior analyzer's session table.
                    let (tx, rx) = mpsc::channel(256);
                    monitor.set_session_events(tx);
                    analyzer.consume_session_events(rx);
                }
                let monitor = Arc::new(monitor);
                monitor
                    .set_bruteforce_threshold(
                        config.auth_log.bruteforce_threshold,
                        config.auth_log.bruteforce_window_secs,
                    )
                    .await;
                Some(monitor)
            }
            None => {
                anyhow::bail!(
                    "no authentication log found (tried {} and {})",
                    config.auth_log.path,
                    config.auth_log.fallback_path
                );
            }
        }
    } else {
        None
    };

    // ── File integrity monitor ──────────────────────────────────────────
    let integrity = if config.integrity.enabled {
        let integrity = Arc::new(FileIntegrityMonitor::new(bus.clone()));
        integrity
            .set_change_handler(Box::new(|path, _baseline, _current| {
                warn!(path = %path, "critical file changed");
            }))
            .await;
        for file in &config.integrity.files {
            integrity.add_file(Path::new(file)).await;
        }
        for dir in &config.integrity.directories {
            integrity
                .add_directory(Path::new(dir), config.integrity.recursive)
                .await;
        }
        Some(integrity)
    } else {
        None
    };

    // ── Start everything and wait for Ctrl-C ───────────────────────────
    if let Some(monitor) = &log_monitor {
        monitor.start();
    }
    if let Some(integrity) = &integrity {
        integrity.start(config.integrity.interval_secs);
    }
    if let Some(analyzer) = &analyzer {
        analyzer.start();
    }

    bus.trigger("INFO", "Vigil started").await;
    eprintln!("Vigil running (Ctrl+C to stop)");

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down...");

    if let Some(monitor) = &log_monitor {
        monitor.stop().await;
    }
    if let Some(integrity) = &integrity {
        integrity.stop().await;
    }
    if let Some(analyzer) = &analyzer {
        analyzer.stop().await;
    }

    bus.trigger("INFO", "Vigil stopped").await;
    eprintln!("Vigil stopped.");
    Ok(())
}
