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

//! Metrics snapshot types produced by the monitoring engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;

/// Overall health of the VPN server, derived from a metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally.
    #[default]
    Healthy,
    /// Functional but at least one degradation condition holds.
    Degraded,
    /// A critical condition holds.
    Unhealthy,
    /// Not responding at all.
    Down,
}

/// One full metrics snapshot, replaced atomically on every monitor tick.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerMetrics {
    /// When this snapshot was collected.
    pub timestamp: Option<DateTime<Utc>>,
    /// Derived overall health.
    pub server_status: HealthStatus,
    /// Peer connection statistics.
    pub connections: ConnectionStats,
    /// Network and pool statistics.
    pub network: NetworkStats,
    /// Host resource usage; all zero when collection is disabled.
    pub system: SystemStats,
    /// Firewall and login statistics.
    pub security: SecurityStats,
    /// WireGuard runtime statistics.
    pub wireguard: WireGuardStats,
    /// Request-level performance statistics.
    pub performance: PerformanceStats,
    /// Alerts active at collection time.
    pub alerts: Vec<Alert>,
}

/// Statistics about configured and connected peers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionStats {
    /// Total peers in the store.
    pub total_peers: i64,
    /// Peers with a handshake inside the activity window (5 minutes).
    pub active_peers: i64,
    /// Connect events logged in the last hour.
    pub recent_connects: i64,
    /// Disconnect events logged in the last hour.
    pub recent_disconnects: i64,
}

/// Aggregate traffic and address-pool statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkStats {
    /// Sum of bytes received across all peers.
    pub bytes_received: i64,
    /// Sum of bytes sent across all peers.
    pub bytes_sent: i64,
    /// Allocated pool slots as a percentage of total usable hosts.
    pub ip_pool_utilization: f64,
}

/// Host resource usage. Values default to zero when the platform refuses
/// or collection is disabled.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemStats {
    /// Global CPU usage percentage.
    pub cpu_usage: f64,
    /// Memory usage percentage.
    pub memory_usage: f64,
    /// Disk usage percentage of the root filesystem.
    pub disk_usage: f64,
    /// Thread count of this process.
    pub thread_count: u64,
    /// Host uptime in seconds.
    pub uptime_secs: u64,
}

/// Firewall and authentication statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityStats {
    /// Whether the packet filter is enabled.
    pub firewall_enabled: bool,
    /// Number of active packet-filter rules.
    pub active_rules: usize,
    /// Blocked connection attempts (requires log analysis, currently 0).
    pub blocked_connections: i64,
    /// Failed login attempts (requires auth log analysis, currently 0).
    pub failed_logins: i64,
}

/// WireGuard runtime statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WireGuardStats {
    /// Whether the interface is up.
    pub interface_up: bool,
    /// UDP listen port from the active config.
    pub listen_port: u16,
    /// Server public key.
    pub public_key: String,
    /// Peers present in the config file.
    pub total_peers: i64,
    /// Peers with a recent handshake.
    pub active_peers: i64,
    /// Most recent handshake recorded for any peer.
    pub last_handshake: Option<DateTime<Utc>>,
}

/// Request-level performance statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceStats {
    /// Average API response time in milliseconds.
    pub response_time_ms: u64,
    /// Failed requests as a percentage of all requests.
    pub error_rate: f64,
}
