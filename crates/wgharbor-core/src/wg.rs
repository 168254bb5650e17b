// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Driver for the host WireGuard implementation. The on-disk config file
//! is the single source of truth; interface lifecycle goes through
//! `wg-quick` and runtime state through `wg show`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, PeerStanza, ServerConfig};

#[derive(Debug, thiserror::Error)]
pub enum WgError {
    #[error("config file not found: {0}")]
    ConfigMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {output}")]
    Tool { tool: &'static str, output: String },
}

type Result<T> = std::result::Result<T, WgError>;

/// Interface state as reported by `wg show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    Running,
    Stopped,
    Error,
}

/// Snapshot of the interface's runtime status.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    pub state: InterfaceState,
    pub interface: String,
    pub last_updated: DateTime<Utc>,
    pub peer_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One peer's kernel-side runtime state, as reported by `wg show <iface> dump`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimePeer {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub latest_handshake: Option<DateTime<Utc>>,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
    pub persistent_keepalive: Option<u16>,
}

/// Parse `wg show <iface> dump` output. The first line describes the
/// interface itself and is skipped; each following line is one peer:
/// public-key, preshared-key, endpoint, allowed-ips, latest-handshake
/// (unix seconds, 0 for never), transfer-rx, transfer-tx, keepalive.
fn parse_show_dump(text: &str) -> Vec<RuntimePeer> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 8 {
                return None;
            }

            let latest_handshake = fields[4]
                .parse::<i64>()
                .ok()
                .filter(|&secs| secs > 0)
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

            Some(RuntimePeer {
                public_key: fields[0].to_string(),
                endpoint: match fields[2] {
                    "(none)" => None,
                    other => Some(other.to_string()),
                },
                allowed_ips: fields[3]
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty() && *s != "(none)")
                    .map(str::to_string)
                    .collect(),
                latest_handshake,
                transfer_rx: fields[5].parse().unwrap_or(0),
                transfer_tx: fields[6].parse().unwrap_or(0),
                persistent_keepalive: fields[7].parse().ok(),
            })
        })
        .collect()
}

/// Manages one WireGuard interface through its config file and the
/// platform tooling.
#[derive(Debug, Clone)]
pub struct WgServer {
    config_dir: PathBuf,
    interface: String,
}

impl WgServer {
    pub fn new(config_dir: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            interface: interface.into(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    /// Write the interface stanza at mode 0600, atomically.
    #[tracing::instrument(skip(self, config))]
    pub async fn write_config(&self, config: &ServerConfig) -> Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        self.write_file(&config.render()).await?;
        info!(path = %self.config_path().display(), "wrote interface config");
        Ok(())
    }

    /// Write a fully rendered config file, typically the interface stanza
    /// plus one peer stanza per enabled peer.
    pub async fn write_config_with_peers(
        &self,
        config: &ServerConfig,
        peers: &[PeerStanza],
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        let mut file = ConfigFile::parse(&config.render());
        for peer in peers {
            file.push_peer(peer);
        }
        self.write_file(&file.render()).await?;
        info!(
            path = %self.config_path().display(),
            peer_count = peers.len(),
            "wrote interface config"
        );
        Ok(())
    }

    /// Bring the interface up from its config file.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let path = self.config_path();
        if !path.exists() {
            return Err(WgError::ConfigMissing(path));
        }

        let output = Command::new("wg-quick").arg("up").arg(&path).output().await?;
        if !output.status.success() {
            return Err(WgError::Tool {
                tool: "wg-quick up",
                output: combined_output(&output),
            });
        }
        info!(interface = %self.interface, "interface up");
        Ok(())
    }

    /// Bring the interface down. Already-down interfaces are a no-op so
    /// stop is idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let path = self.config_path();
        let output = Command::new("wg-quick").arg("down").arg(&path).output().await?;
        if !output.status.success() {
            let text = combined_output(&output);
            if text.contains("is not a WireGuard interface") || text.contains("No such device") {
                debug!(interface = %self.interface, "interface already down");
                return Ok(());
            }
            return Err(WgError::Tool {
                tool: "wg-quick down",
                output: text,
            });
        }
        info!(interface = %self.interface, "interface down");
        Ok(())
    }

    /// Stop (ignoring errors), pause briefly, then start.
    pub async fn restart(&self) -> Result<()> {
        if let Err(e) = self.stop().await {
            warn!(error = %e, "stop before restart failed, continuing");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.start().await
    }

    /// Query `wg show` for the interface's runtime state.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self) -> Result<InterfaceStatus> {
        let mut status = InterfaceStatus {
            state: InterfaceState::Stopped,
            interface: self.interface.clone(),
            last_updated: Utc::now(),
            peer_count: 0,
            error_message: None,
        };

        let output = Command::new("wg").arg("show").arg(&self.interface).output().await?;
        if !output.status.success() {
            let text = combined_output(&output);
            if text.contains("No such device") {
                return Ok(status);
            }
            status.state = InterfaceState::Error;
            status.error_message = Some(format!("failed to get interface status: {text}"));
            return Ok(status);
        }

        status.state = InterfaceState::Running;
        status.peer_count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| line.starts_with("peer:"))
            .count();
        Ok(status)
    }

    /// Kernel-side peer state: handshake timestamps and byte counters.
    /// Feeds the reconciliation that pushes counters back into peer rows.
    #[tracing::instrument(skip(self))]
    pub async fn runtime_peers(&self) -> Result<Vec<RuntimePeer>> {
        let output = Command::new("wg")
            .args(["show", &self.interface, "dump"])
            .output()
            .await?;
        if !output.status.success() {
            let text = combined_output(&output);
            if text.contains("No such device") {
                return Ok(Vec::new());
            }
            return Err(WgError::Tool {
                tool: "wg show dump",
                output: text,
            });
        }
        Ok(parse_show_dump(&String::from_utf8_lossy(&output.stdout)))
    }

    pub async fn is_running(&self) -> bool {
        matches!(
            self.status().await,
            Ok(InterfaceStatus {
                state: InterfaceState::Running,
                ..
            })
        )
    }

    /// Append a `[Peer]` stanza to the config file.
    #[tracing::instrument(skip(self, peer), fields(public_key = %peer.public_key))]
    pub async fn add_peer(&self, peer: &PeerStanza) -> Result<()> {
        let mut file = self.read_config_file().await?;
        file.push_peer(peer);
        self.write_file(&file.render()).await?;
        debug!(interface = %self.interface, "peer added to config");
        Ok(())
    }

    /// Remove the `[Peer]` stanza whose PublicKey matches exactly. A
    /// missing peer is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn remove_peer(&self, public_key: &str) -> Result<()> {
        let mut file = self.read_config_file().await?;
        if file.remove_peer(public_key) {
            self.write_file(&file.render()).await?;
            debug!(interface = %self.interface, "peer removed from config");
        }
        Ok(())
    }

    /// Parse the interface section of the config file.
    pub async fn get_config(&self) -> Result<ServerConfig> {
        let file = self.read_config_file().await?;
        Ok(ServerConfig::from_config_file(&file, &self.interface))
    }

    /// Parse the peer stanzas of the config file, in file order. A missing
    /// file means no peers.
    pub async fn get_peers(&self) -> Result<Vec<PeerStanza>> {
        if !self.config_path().exists() {
            return Ok(Vec::new());
        }
        Ok(self.read_config_file().await?.peer_stanzas())
    }

    async fn read_config_file(&self) -> Result<ConfigFile> {
        let path = self.config_path();
        if !path.exists() {
            return Err(WgError::ConfigMissing(path));
        }
        let text = tokio::fs::read_to_string(&path).await?;
        Ok(ConfigFile::parse(&text))
    }

    /// Full-file replacement: write a temp file in the same directory at
    /// 0600, then rename onto the target so a crash cannot leave a
    /// half-written config.
    async fn write_file(&self, content: &str) -> Result<()> {
        let path = self.config_path();
        let tmp = self
            .config_dir
            .join(format!(".{}.conf.tmp", self.interface));

        tokio::fs::write(&tmp, content).await?;
        set_owner_only(&tmp).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim().to_string()
}

#[cfg(unix)]
async fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
