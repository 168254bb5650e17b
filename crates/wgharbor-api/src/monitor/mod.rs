//! Monitoring engine: samples connection, network, system, security, and
//! WireGuard metrics on a fixed tick from one background task, derives the
//! server's health state, and feeds the alert manager.

pub mod alerts;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use wgharbor_core::{IpPool, PfctlManager, WgServer};
use wgharbor_types::{
    AlertConfig, ConnectionStats, HealthStatus, NetworkStats, SecurityStats, ServerMetrics,
    SystemStats, WireGuardStats,
};

use crate::db::vpn::VpnStore;
use alerts::AlertManager;

/// Peers with a handshake newer than this are counted as active.
const ACTIVITY_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,
}

/// Tuning knobs for the monitoring loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub update_interval: Duration,
    pub log_retention_days: u32,
    pub enable_system_stats: bool,
    pub alerts: AlertConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(30),
            log_retention_days: 30,
            enable_system_stats: true,
            alerts: AlertConfig::default(),
        }
    }
}

#[derive(Default)]
struct TaskState {
    running: bool,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    store: VpnStore,
    wg: WgServer,
    pool: Arc<IpPool>,
    firewall: PfctlManager,
    config: MonitorConfig,
    alerts: AlertManager,
    metrics: Mutex<ServerMetrics>,
    task: Mutex<TaskState>,
}

/// Cloneable handle to the monitoring engine.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(
        store: VpnStore,
        wg: WgServer,
        pool: Arc<IpPool>,
        firewall: PfctlManager,
        config: MonitorConfig,
    ) -> Self {
        let alerts = AlertManager::new(config.alerts.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                wg,
                pool,
                firewall,
                config,
                alerts,
                metrics: Mutex::new(ServerMetrics::default()),
                task: Mutex::new(TaskState::default()),
            }),
        }
    }

    /// Spawn the background sampling task. A second call while running is
    /// an error.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut task = self.inner.task.lock().unwrap();
        if task.running {
            return Err(MonitorError::AlreadyRunning);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.update_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        collect(&inner).await;
                    }
                    _ = stop_rx.changed() => {
                        debug!("monitor stop signal received");
                        break;
                    }
                }
            }
        });

        task.running = true;
        task.stop_tx = Some(stop_tx);
        task.handle = Some(handle);
        info!("monitoring started");
        Ok(())
    }

    /// Signal the task and wait for it to exit. Stopping a monitor that
    /// is not running is an error; a repeated stop after success is too.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let (stop_tx, handle) = {
            let mut task = self.inner.task.lock().unwrap();
            if !task.running {
                return Err(MonitorError::NotRunning);
            }
            task.running = false;
            (task.stop_tx.take(), task.handle.take())
        };

        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("monitoring stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.task.lock().unwrap().running
    }

    /// Deep copy of the latest snapshot.
    pub fn get_metrics(&self) -> ServerMetrics {
        self.inner.metrics.lock().unwrap().clone()
    }

    pub fn server_status(&self) -> HealthStatus {
        self.inner.metrics.lock().unwrap().server_status
    }

    pub fn is_healthy(&self) -> bool {
        self.server_status() == HealthStatus::Healthy
    }

    pub fn alert_manager(&self) -> &AlertManager {
        &self.inner.alerts
    }

    /// Run one collection cycle immediately, outside the tick schedule.
    pub async fn collect_now(&self) {
        collect(&self.inner).await;
    }
}

async fn collect(inner: &Inner) {
    let now = Utc::now();

    let connections = collect_connection_stats(inner).await;
    let network = collect_network_stats(inner).await;
    let system = if inner.config.enable_system_stats {
        collect_system_stats()
    } else {
        SystemStats::default()
    };
    let security = collect_security_stats(inner).await;
    let wireguard = collect_wireguard_stats(inner).await;

    let server_status = derive_status(&system, &security);

    let mut snapshot = ServerMetrics {
        timestamp: Some(now),
        server_status,
        connections,
        network,
        system,
        security,
        wireguard,
        performance: Default::default(),
        alerts: Vec::new(),
    };

    inner.alerts.evaluate(&snapshot);
    snapshot.alerts = inner.alerts.active_alerts();

    *inner.metrics.lock().unwrap() = snapshot;
    debug!("metrics snapshot updated");
}

async fn collect_connection_stats(inner: &Inner) -> ConnectionStats {
    let now = Utc::now();
    let peers = match inner.store.list_peers().await {
        Ok(peers) => peers,
        Err(e) => {
            error!(error = %e, "failed to collect connection stats");
            return ConnectionStats::default();
        }
    };

    let active_peers = peers
        .iter()
        .filter(|p| {
            p.last_handshake
                .map(|h| now - h < ACTIVITY_WINDOW)
                .unwrap_or(false)
        })
        .count() as i64;

    let hour_ago = now - chrono::Duration::hours(1);
    let recent_connects = inner
        .store
        .count_connections_since("connect", hour_ago)
        .await
        .unwrap_or(0);
    let recent_disconnects = inner
        .store
        .count_connections_since("disconnect", hour_ago)
        .await
        .unwrap_or(0);

    ConnectionStats {
        total_peers: peers.len() as i64,
        active_peers,
        recent_connects,
        recent_disconnects,
    }
}

async fn collect_network_stats(inner: &Inner) -> NetworkStats {
    let (bytes_received, bytes_sent) = match inner.store.list_peers().await {
        Ok(peers) => peers.iter().fold((0i64, 0i64), |(rx, tx), p| {
            (rx + p.bytes_received, tx + p.bytes_sent)
        }),
        Err(e) => {
            error!(error = %e, "failed to collect network stats");
            (0, 0)
        }
    };

    let total = inner.pool.total_hosts();
    let ip_pool_utilization = if total > 0 {
        inner.pool.allocated_count() as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    NetworkStats {
        bytes_received,
        bytes_sent,
        ip_pool_utilization,
    }
}

fn collect_system_stats() -> SystemStats {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();

    let memory_usage = if sys.total_memory() > 0 {
        sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
    } else {
        0.0
    };

    let disks = sysinfo::Disks::new_with_refreshed_list();
    let disk_usage = disks
        .list()
        .first()
        .map(|disk| {
            let total = disk.total_space();
            if total > 0 {
                (total - disk.available_space()) as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    SystemStats {
        cpu_usage: sys.global_cpu_usage() as f64,
        memory_usage,
        disk_usage,
        thread_count: thread_count(),
        uptime_secs: System::uptime(),
    }
}

#[cfg(target_os = "linux")]
fn thread_count() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("Threads:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn thread_count() -> u64 {
    0
}

async fn collect_security_stats(inner: &Inner) -> SecurityStats {
    let firewall_enabled = inner.firewall.is_enabled().await.unwrap_or(false);
    let active_rules = inner
        .firewall
        .get_active_rules()
        .await
        .map(|rules| rules.len())
        .unwrap_or(0);

    SecurityStats {
        firewall_enabled,
        active_rules,
        blocked_connections: 0,
        failed_logins: 0,
    }
}

async fn collect_wireguard_stats(inner: &Inner) -> WireGuardStats {
    let interface_up = inner.wg.is_running().await;

    let (listen_port, public_key) = match inner.wg.get_config().await {
        Ok(config) => (config.listen_port, config.public_key),
        Err(_) => (0, String::new()),
    };

    let total_peers = inner
        .wg
        .get_peers()
        .await
        .map(|peers| peers.len() as i64)
        .unwrap_or(0);

    let now = Utc::now();

    // Prefer the kernel's own handshake data; fall back to the last
    // persisted samples when the interface is down.
    let handshakes: Vec<chrono::DateTime<Utc>> = match inner.wg.runtime_peers().await {
        Ok(peers) if !peers.is_empty() => {
            peers.iter().filter_map(|p| p.latest_handshake).collect()
        }
        _ => match inner.store.list_peers().await {
            Ok(peers) => peers.iter().filter_map(|p| p.last_handshake).collect(),
            Err(_) => Vec::new(),
        },
    };
    let active_peers = handshakes
        .iter()
        .filter(|&&h| now - h < ACTIVITY_WINDOW)
        .count() as i64;
    let last_handshake = handshakes.into_iter().max();

    WireGuardStats {
        interface_up,
        listen_port,
        public_key,
        total_peers,
        active_peers,
        last_handshake,
    }
}

fn derive_status(system: &SystemStats, security: &SecurityStats) -> HealthStatus {
    if !security.firewall_enabled {
        return HealthStatus::Degraded;
    }
    if system.memory_usage > 90.0 || system.thread_count > 1000 {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    async fn test_monitor(dir: &TempDir) -> Monitor {
        let pool = db::create_pool("sqlite::memory:").await;
        db::migrate(&pool).await;
        let store = VpnStore::new(pool);
        let wg = WgServer::new(dir.path(), "wg-test");
        let ip_pool = Arc::new(IpPool::new("10.0.0.0/24").unwrap());
        let firewall =
            PfctlManager::with_paths(dir.path().join("pf.conf"), dir.path().join("vpn.conf"));

        let config = MonitorConfig {
            update_interval: Duration::from_millis(50),
            enable_system_stats: false,
            ..Default::default()
        };
        Monitor::new(store, wg, ip_pool, firewall, config)
    }

    #[tokio::test]
    async fn start_is_exclusive_and_stop_is_ordered() {
        let dir = TempDir::new().unwrap();
        let monitor = test_monitor(&dir).await;

        assert!(matches!(
            monitor.stop().await,
            Err(MonitorError::NotRunning)
        ));

        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(matches!(monitor.start(), Err(MonitorError::AlreadyRunning)));

        monitor.stop().await.unwrap();
        assert!(!monitor.is_running());
        assert!(matches!(
            monitor.stop().await,
            Err(MonitorError::NotRunning)
        ));

        // Restart after a clean stop is allowed.
        monitor.start().unwrap();
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn collect_produces_a_snapshot() {
        let dir = TempDir::new().unwrap();
        let monitor = test_monitor(&dir).await;

        assert!(monitor.get_metrics().timestamp.is_none());
        monitor.collect_now().await;

        let metrics = monitor.get_metrics();
        assert!(metrics.timestamp.is_some());
        assert_eq!(metrics.connections.total_peers, 0);
        assert_eq!(metrics.network.ip_pool_utilization, 0.0);
        // No firewall in the test environment: degraded, with an alert.
        assert_eq!(metrics.server_status, HealthStatus::Degraded);
        assert!(metrics
            .alerts
            .iter()
            .any(|a| a.id == "security_firewall_disabled"));
    }

    #[tokio::test]
    async fn metrics_reflect_store_contents() {
        let dir = TempDir::new().unwrap();
        let monitor = test_monitor(&dir).await;
        let store = &monitor.inner.store;

        let peer = store
            .create_peer("laptop", "pk1", "sk1", "10.0.0.2")
            .await
            .unwrap();
        store
            .update_peer_runtime(peer.id, 1000, 2000, Some(Utc::now()))
            .await
            .unwrap();
        monitor.inner.pool.allocate_specific("10.0.0.2").unwrap();

        monitor.collect_now().await;
        let metrics = monitor.get_metrics();

        assert_eq!(metrics.connections.total_peers, 1);
        assert_eq!(metrics.connections.active_peers, 1);
        assert_eq!(metrics.network.bytes_received, 1000);
        assert_eq!(metrics.network.bytes_sent, 2000);
        assert!(metrics.network.ip_pool_utilization > 0.0);
        assert!(metrics.wireguard.last_handshake.is_some());
    }

    #[tokio::test]
    async fn background_task_ticks() {
        let dir = TempDir::new().unwrap();
        let monitor = test_monitor(&dir).await;

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.stop().await.unwrap();

        assert!(monitor.get_metrics().timestamp.is_some());
    }
}
