//! Firewall response port.
//!
//! Blocks brute-force sources at the host firewall. The actual packet filter
//! is behind the [`PacketFilter`] trait so tests (and hosts without
//! `iptables`) can substitute a no-op; the production implementation shells
//! out to `iptables` with a tagged comment so operators can identify and
//! remove Vigil's rules.
//!
//! [`FirewallResponder`] is an alert sink: registered on the bus, it reacts
//! to `BRUTE_FORCE` alerts by extracting the offending source address and
//! blocking it once.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::alerts::Alert;
use crate::sinks::socket::extract_ip;
use crate::sinks::AlertSink;

/// True for a syntactically valid dotted-quad IPv4 address.
pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.parse::<std::net::Ipv4Addr>().is_ok()
}

/// Host packet filter operations.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    async fn block(&self, ip: &str, reason: &str) -> Result<()>;
    async fn unblock(&self, ip: &str) -> Result<()>;
}

/// Packet filter backed by the `iptables` binary.
pub struct IptablesFilter;

#[async_trait]
impl PacketFilter for IptablesFilter {
    async fn block(&self, ip: &str, reason: &str) -> Result<()> {
        if !is_valid_ipv4(ip) {
            anyhow::bail!("refusing to block invalid IPv4 address: {}", ip);
        }
        let comment = if reason.is_empty() {
            "Blocked by Vigil".to_string()
        } else {
            format!("Blocked by Vigil: {}", reason)
        };
        let output = Command::new("iptables")
            .args([
                "-A", "INPUT", "-s", ip, "-j", "DROP", "-m", "comment", "--comment", &comment,
            ])
            .output()
            .await
            .context("failed to run iptables")?;
        if !output.status.success() {
            anyhow::bail!(
                "iptables block failed for {}: {}",
                ip,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn unblock(&self, ip: &str) -> Result<()> {
        if !is_valid_ipv4(ip) {
            anyhow::bail!("refusing to unblock invalid IPv4 address: {}", ip);
        }
        let output = Command::new("iptables")
            .args(["-D", "INPUT", "-s", ip, "-j", "DROP"])
            .output()
            .await
            .context("failed to run iptables")?;
        if !output.status.success() {
            anyhow::bail!(
                "iptables unblock failed for {}: {}",
                ip,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Sink that blocks the source of every `BRUTE_FORCE` alert, once per address.
pub struct FirewallResponder {
    filter: Arc<dyn PacketFilter>,
    blocked: Mutex<HashSet<String>>,
}

impl FirewallResponder {
    pub fn new(filter: Arc<dyn PacketFilter>) -> Self {
        Self {
            filter,
            blocked: Mutex::new(HashSet::new()),
        }
    }

    /// Addresses blocked so far.
    pub fn blocked_ips(&self) -> Vec<String> {
        self.blocked.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl AlertSink for FirewallResponder {
    async fn send(&self, alert: &Alert) -> Result<()> {
        if alert.alert_type != "BRUTE_FORCE" {
            return Ok(());
        }
        let Some(ip) = extract_ip(&alert.message) else {
            warn!(message = %alert.message, "brute-force alert carries no IP= token");
            return Ok(());
        };
        if !is_valid_ipv4(ip) {
            warn!(ip = %ip, "brute-force alert carries a malformed address");
            return Ok(());
        }
        {
            let mut blocked = self.blocked.lock().unwrap();
            // The detector re-fires for every failure past the threshold;
            // only the first alert per address reaches the filter.
            if !blocked.insert(ip.to_string()) {
                return Ok(());
            }
        }
        self.filter.block(ip, &alert.message).await?;
        info!(ip = %ip, "blocked brute-force source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ipv4() {
        assert!(is_valid_ipv4("10.0.0.7"));
        assert!(is_valid_ipv4("255.255.255.255"));
        assert!(!is_valid_ipv4("10.0.0"));
        assert!(!is_valid_ipv4("10.0.0.256"));
        assert!(!is_valid_ipv4("evil.example.com"));
        assert!(!is_valid_ipv4(""));
    }

    /// Records calls instead of touching the host firewall.
    struct MockFilter {
        calls: Mutex<Vec<String>>,
    }

    impl MockFilter {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PacketFilter for MockFilter {
        async fn block(&self, ip: &str, _reason: &str) -> Result<()> {
            self.calls.lock().unwrap().push(ip.to_string());
            Ok(())
        }

        async fn unblock(&self, _ip: &str) -> Result<()> {
            Ok(())
        }
    }

    fn brute_alert(ip: &str) -> Alert {
        Alert::new(
            "BRUTE_FORCE",
            &format!("Brute force attack from IP={} with 5 failed attempts", ip),
            5,
        )
    }

    #[tokio::test]
    async fn test_blocks_bruteforce_source_once() {
        let filter = Arc::new(MockFilter::new());
        let responder = FirewallResponder::new(filter.clone());

        responder.send(&brute_alert("10.0.0.7")).await.unwrap();
        responder.send(&brute_alert("10.0.0.7")).await.unwrap();
        responder.send(&brute_alert("10.0.0.8")).await.unwrap();

        let calls = filter.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["10.0.0.7", "10.0.0.8"]);
        assert_eq!(responder.blocked_ips().len(), 2);
    }

    #[tokio::test]
    async fn test_ignores_other_alert_types() {
        let filter = Arc::new(MockFilter::new());
        let responder = FirewallResponder::new(filter.clone());

        let alert = Alert::new("FAILED_LOGIN", "user=bob, IP=10.0.0.7", 2);
        responder.send(&alert).await.unwrap();
        assert!(filter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_missing_or_bad_address() {
        let filter = Arc::new(MockFilter::new());
        let responder = FirewallResponder::new(filter.clone());

        let no_ip = Alert::new("BRUTE_FORCE", "no address here", 5);
        responder.send(&no_ip).await.unwrap();

        let bad_ip = Alert::new("BRUTE_FORCE", "from IP=999.1.2.3 somewhere", 5);
        responder.send(&bad_ip).await.unwrap();

        assert!(filter.calls.lock().unwrap().is_empty());
    }
}
