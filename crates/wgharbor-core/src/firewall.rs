//! pfctl driver: renders the VPN NAT/forward ruleset, merges it into the
//! host ruleset behind a sentinel comment, and loads it. Every mutating
//! call needs elevated privileges; denials surface as a distinct error
//! kind instead of a panic.

use std::path::{Path, PathBuf};

use chrono::Utc;
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::fmt::Write as _;
use tokio::process::Command;
use tracing::{debug, info};

/// First line of the managed block; its presence makes repeated enables
/// idempotent.
pub const RULE_SENTINEL: &str = "# WireGuard VPN NAT Rules";
const RULE_SENTINEL_END: &str = "# End WireGuard VPN NAT Rules";

#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    #[error("interface name is required")]
    MissingInterface,

    #[error("external interface name is required")]
    MissingExternalInterface,

    #[error("invalid VPN network CIDR: {0}")]
    InvalidNetwork(String),

    #[error("listen port must be between 1 and 65535")]
    InvalidListenPort,

    #[error("invalid allowed port: {0}")]
    InvalidAllowedPort(u16),

    #[error("elevated privileges required: {0}")]
    PermissionDenied(String),

    #[error("{context}: {output}")]
    Tool { context: &'static str, output: String },

    #[error("failed to restore pfctl configuration: {0}")]
    Restore(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, FirewallError>;

/// Parameters for the generated ruleset.
#[derive(Debug, Clone)]
pub struct VpnRuleConfig {
    /// WireGuard interface name, e.g. `wg0`.
    pub interface: String,
    /// VPN network in CIDR notation.
    pub vpn_network: String,
    /// Uplink interface carrying NATed traffic, e.g. `en0`.
    pub external_interface: String,
    /// UDP listen port to open on the uplink, if any.
    pub listen_port: Option<u16>,
    /// TCP ports peers may reach outbound; empty means no restriction
    /// rule is emitted.
    pub allowed_ports: Vec<u16>,
}

impl VpnRuleConfig {
    /// Refuse invalid input before any host mutation.
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(FirewallError::MissingInterface);
        }
        if self.external_interface.is_empty() {
            return Err(FirewallError::MissingExternalInterface);
        }
        if self.vpn_network.parse::<IpNetwork>().is_err() {
            return Err(FirewallError::InvalidNetwork(self.vpn_network.clone()));
        }
        if self.listen_port == Some(0) {
            return Err(FirewallError::InvalidListenPort);
        }
        if let Some(&port) = self.allowed_ports.iter().find(|&&p| p == 0) {
            return Err(FirewallError::InvalidAllowedPort(port));
        }
        Ok(())
    }
}

/// Status summary for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct FirewallStatus {
    pub state: String,
    pub rule_count: usize,
}

/// Drives pfctl against the host ruleset at `config_path`, staging the
/// VPN fragment at `vpn_config_path`.
#[derive(Debug, Clone)]
pub struct PfctlManager {
    config_path: PathBuf,
    vpn_config_path: PathBuf,
}

impl Default for PfctlManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PfctlManager {
    pub fn new() -> Self {
        Self {
            config_path: PathBuf::from("/etc/pf.conf"),
            vpn_config_path: PathBuf::from("/tmp/pf_vpn.conf"),
        }
    }

    pub fn with_paths(config_path: impl Into<PathBuf>, vpn_config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            vpn_config_path: vpn_config_path.into(),
        }
    }

    /// Render the sentinel-delimited VPN ruleset fragment.
    pub fn generate_config(&self, config: &VpnRuleConfig) -> String {
        let mut out = String::new();
        writeln!(out, "{RULE_SENTINEL}").unwrap();
        writeln!(
            out,
            "nat on {ext} from {net} to any -> ({ext})",
            ext = config.external_interface,
            net = config.vpn_network,
        )
        .unwrap();
        writeln!(out, "pass in on {}", config.interface).unwrap();
        writeln!(out, "pass out on {}", config.external_interface).unwrap();
        if let Some(port) = config.listen_port {
            writeln!(
                out,
                "pass in on {} proto udp to port {port}",
                config.external_interface
            )
            .unwrap();
        }
        if !config.allowed_ports.is_empty() {
            let ports = config
                .allowed_ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "pass out proto tcp to port {{ {ports} }}").unwrap();
        }
        writeln!(out, "{RULE_SENTINEL_END}").unwrap();
        out
    }

    /// Validate and write the VPN fragment file without touching the host
    /// ruleset.
    pub async fn write_config(&self, config: &VpnRuleConfig) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.vpn_config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.vpn_config_path, self.generate_config(config)).await?;
        debug!(path = %self.vpn_config_path.display(), "wrote VPN ruleset fragment");
        Ok(())
    }

    /// Install the VPN ruleset: back up the host ruleset, merge the
    /// fragment behind the sentinel, load it, and enable the filter.
    #[tracing::instrument(skip(self, config))]
    pub async fn enable(&self, config: &VpnRuleConfig) -> Result<()> {
        self.write_config(config).await?;

        let host = self.read_host_ruleset().await?;
        let backup = self.timestamped_backup_path();
        tokio::fs::write(&backup, &host).await?;
        info!(backup = %backup.display(), "backed up host ruleset");

        let merged = merge_ruleset(&host, &self.generate_config(config));
        tokio::fs::write(&self.config_path, merged).await?;

        self.run_pfctl(
            &["-f", &self.config_path.to_string_lossy()],
            "failed to load pfctl rules",
        )
        .await?;

        if !self.is_enabled().await.unwrap_or(false) {
            let result = self.run_pfctl(&["-e"], "failed to enable pfctl rules").await;
            match result {
                Ok(_) => {}
                Err(FirewallError::Tool { output, .. }) if output.contains("already enabled") => {}
                Err(e) => return Err(e),
            }
        }

        info!("VPN firewall rules enabled");
        Ok(())
    }

    /// Reload the host ruleset without the VPN section.
    #[tracing::instrument(skip(self))]
    pub async fn disable(&self) -> Result<()> {
        let host = self.read_host_ruleset().await?;
        let stripped = strip_vpn_section(&host);
        tokio::fs::write(&self.config_path, stripped).await?;

        self.run_pfctl(
            &["-f", &self.config_path.to_string_lossy()],
            "failed to load pfctl rules",
        )
        .await?;

        info!("VPN firewall rules disabled");
        Ok(())
    }

    /// Copy the current host ruleset to `path`.
    pub async fn create_backup(&self, path: impl AsRef<Path>) -> Result<()> {
        let host = self.read_host_ruleset().await?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, host).await?;
        info!(path = %path.display(), "created ruleset backup");
        Ok(())
    }

    /// Overwrite the host ruleset from a backup and reload it.
    pub async fn restore_from_backup(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(FirewallError::Restore)?;
        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(FirewallError::Restore)?;

        self.run_pfctl(
            &["-f", &self.config_path.to_string_lossy()],
            "failed to restore pfctl configuration",
        )
        .await?;

        info!(path = %path.as_ref().display(), "restored ruleset from backup");
        Ok(())
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        let out = self
            .run_pfctl(&["-s", "info"], "failed to get pfctl status")
            .await?;
        Ok(out.contains("Status: Enabled"))
    }

    pub async fn get_active_rules(&self) -> Result<Vec<String>> {
        let out = self
            .run_pfctl(&["-s", "rules"], "failed to get pfctl rules")
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn get_status(&self) -> Result<FirewallStatus> {
        let enabled = self.is_enabled().await?;
        let rules = self.get_active_rules().await?;
        let state = if enabled { "enabled" } else { "disabled" };
        Ok(FirewallStatus {
            state: state.to_string(),
            rule_count: rules.len(),
        })
    }

    fn timestamped_backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("{}.backup.{stamp}", self.config_path.display()))
    }

    async fn read_host_ruleset(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.config_path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_pfctl(&self, args: &[&str], context: &'static str) -> Result<String> {
        let output = Command::new("pfctl").args(args).output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
                return Err(FirewallError::PermissionDenied(context.to_string()));
            }
            return Err(FirewallError::Tool {
                context,
                output: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Replace any existing sentinel-delimited block, then append the fresh
/// one. Pure so merging is testable without pfctl.
fn merge_ruleset(host: &str, vpn_section: &str) -> String {
    let mut merged = strip_vpn_section(host);
    if !merged.is_empty() && !merged.ends_with('\n') {
        merged.push('\n');
    }
    if !merged.is_empty() {
        merged.push('\n');
    }
    merged.push_str(vpn_section);
    merged
}

fn strip_vpn_section(host: &str) -> String {
    let mut out = String::new();
    let mut in_section = false;
    for line in host.lines() {
        if line.trim() == RULE_SENTINEL {
            in_section = true;
            continue;
        }
        if in_section {
            if line.trim() == RULE_SENTINEL_END {
                in_section = false;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    // Drop trailing blank lines left behind by a removed section.
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    fn sample_config() -> VpnRuleConfig {
        VpnRuleConfig {
            interface: "wg0".to_string(),
            vpn_network: "10.0.0.0/24".to_string(),
            external_interface: "en0".to_string(),
            listen_port: None,
            allowed_ports: vec![],
        }
    }

    #[test]
    fn generates_nat_and_pass_rules() {
        let manager = PfctlManager::new();
        let rules = manager.generate_config(&sample_config());

        assert!(rules.contains(RULE_SENTINEL));
        assert!(rules.contains("nat on en0 from 10.0.0.0/24 to any -> (en0)"));
        assert!(rules.contains("pass in on wg0"));
        assert!(rules.contains("pass out on en0"));
        assert!(!rules.contains("proto udp"));
        assert!(!rules.contains("proto tcp"));
    }

    #[test]
    fn includes_port_rules_when_configured() {
        let manager = PfctlManager::new();
        let mut config = sample_config();
        config.listen_port = Some(51820);
        config.allowed_ports = vec![80, 443, 22];

        let rules = manager.generate_config(&config);
        assert!(rules.contains("pass in on en0 proto udp to port 51820"));
        assert!(rules.contains("pass out proto tcp to port { 80 443 22 }"));
    }

    #[test_case(VpnRuleConfig { interface: String::new(), ..sample_config() }, "interface name is required" ; "empty interface")]
    #[test_case(VpnRuleConfig { external_interface: String::new(), ..sample_config() }, "external interface name is required" ; "empty external interface")]
    #[test_case(VpnRuleConfig { vpn_network: "invalid-network".into(), ..sample_config() }, "invalid VPN network CIDR" ; "bad network")]
    #[test_case(VpnRuleConfig { listen_port: Some(0), ..sample_config() }, "listen port must be between" ; "zero listen port")]
    #[test_case(VpnRuleConfig { allowed_ports: vec![80, 0, 443], ..sample_config() }, "invalid allowed port" ; "zero allowed port")]
    fn validation_refusals(config: VpnRuleConfig, message: &str) {
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(message),
            "expected {message:?} in {err}"
        );
    }

    #[test]
    fn merge_is_idempotent_across_repeated_enables() {
        let manager = PfctlManager::new();
        let vpn = manager.generate_config(&sample_config());

        let host = "set skip on lo0\npass all\n";
        let once = merge_ruleset(host, &vpn);
        let twice = merge_ruleset(&once, &vpn);

        assert_eq!(once, twice);
        assert_eq!(once.matches(RULE_SENTINEL).count(), 1);
        assert!(once.starts_with("set skip on lo0"));
    }

    #[test]
    fn strip_removes_only_the_managed_section() {
        let manager = PfctlManager::new();
        let vpn = manager.generate_config(&sample_config());
        let merged = merge_ruleset("pass all\n", &vpn);

        let stripped = strip_vpn_section(&merged);
        assert!(stripped.contains("pass all"));
        assert!(!stripped.contains(RULE_SENTINEL));
        assert!(!stripped.contains("nat on en0"));
    }

    #[tokio::test]
    async fn write_config_creates_fragment_file() {
        let dir = TempDir::new().unwrap();
        let vpn_path = dir.path().join("nested").join("vpn.conf");
        let manager = PfctlManager::with_paths(dir.path().join("pf.conf"), &vpn_path);

        let mut config = sample_config();
        config.vpn_network = "192.168.100.0/24".to_string();
        manager.write_config(&config).await.unwrap();

        let written = std::fs::read_to_string(&vpn_path).unwrap();
        assert!(written.contains("192.168.100.0/24"));
        assert!(written.contains("wg0"));
        assert!(written.contains("en0"));
    }

    #[tokio::test]
    async fn write_config_rejects_invalid_input_before_touching_disk() {
        let dir = TempDir::new().unwrap();
        let vpn_path = dir.path().join("vpn.conf");
        let manager = PfctlManager::with_paths(dir.path().join("pf.conf"), &vpn_path);

        let mut config = sample_config();
        config.vpn_network = "bogus".to_string();
        assert!(manager.write_config(&config).await.is_err());
        assert!(!vpn_path.exists());
    }

    // pfctl itself needs root (and exists only on pf platforms); in a test
    // environment mutating calls must fail with a descriptive error, never
    // panic.
    #[tokio::test]
    async fn enable_without_privileges_fails_gracefully() {
        let dir = TempDir::new().unwrap();
        let manager =
            PfctlManager::with_paths(dir.path().join("pf.conf"), dir.path().join("vpn.conf"));

        let result = manager.enable(&sample_config()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_backup_copies_the_host_ruleset() {
        let dir = TempDir::new().unwrap();
        let host_path = dir.path().join("pf.conf");
        std::fs::write(&host_path, "pass all\n").unwrap();
        let manager = PfctlManager::with_paths(&host_path, dir.path().join("vpn.conf"));

        let backup = dir.path().join("backups").join("pf_backup.conf");
        manager.create_backup(&backup).await.unwrap();
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "pass all\n");
    }

    #[tokio::test]
    async fn status_queries_fail_gracefully_without_pfctl() {
        let manager = PfctlManager::new();
        match manager.get_status().await {
            Ok(status) => assert!(status.state == "enabled" || status.state == "disabled"),
            Err(e) => {
                let message = e.to_string();
                assert!(
                    message.contains("pfctl status")
                        || message.contains("pfctl rules")
                        || message.contains("IO error"),
                    "unexpected error: {message}"
                );
            }
        }
    }

    #[tokio::test]
    async fn restore_from_missing_backup_fails() {
        let dir = TempDir::new().unwrap();
        let manager =
            PfctlManager::with_paths(dir.path().join("pf.conf"), dir.path().join("vpn.conf"));

        let err = manager
            .restore_from_backup(dir.path().join("nope.conf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to restore pfctl configuration"));
    }
}
