//! Threshold evaluation and the alert state machine. One alert exists per
//! stable id; re-triggers while active bump the count, clears resolve,
//! and resolved alerts age out after 24 hours.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};
use wgharbor_types::{Alert, AlertConfig, AlertSeverity, AlertStatus, AlertType, ServerMetrics};

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(String),

    #[error("alert already resolved: {0}")]
    AlreadyResolved(String),
}

type Result<T> = std::result::Result<T, AlertError>;

const RESOLVED_RETENTION: Duration = Duration::hours(24);

#[derive(Debug)]
pub struct AlertManager {
    alerts: Mutex<HashMap<String, Alert>>,
    config: AlertConfig,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            alerts: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Run every rule against a metrics snapshot, then expire suppression
    /// windows and age out old resolved alerts.
    pub fn evaluate(&self, metrics: &ServerMetrics) {
        if !self.config.enabled {
            return;
        }

        let now = Utc::now();
        let mut alerts = self.alerts.lock().unwrap();

        // System resources.
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.system.cpu_usage > self.config.cpu_threshold,
            "system_cpu_high",
            AlertType::System,
            AlertSeverity::High,
            "High CPU Usage",
            format!(
                "CPU usage is {:.1}%, exceeding threshold of {:.1}%",
                metrics.system.cpu_usage, self.config.cpu_threshold
            ),
            HashMap::from([
                ("cpu_usage".to_string(), json!(metrics.system.cpu_usage)),
                ("threshold".to_string(), json!(self.config.cpu_threshold)),
            ]),
        );
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.system.memory_usage > self.config.memory_threshold,
            "system_memory_high",
            AlertType::System,
            AlertSeverity::High,
            "High Memory Usage",
            format!(
                "Memory usage is {:.1}%, exceeding threshold of {:.1}%",
                metrics.system.memory_usage, self.config.memory_threshold
            ),
            HashMap::from([
                ("memory_usage".to_string(), json!(metrics.system.memory_usage)),
                ("threshold".to_string(), json!(self.config.memory_threshold)),
            ]),
        );
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.system.disk_usage > self.config.disk_threshold,
            "system_disk_high",
            AlertType::System,
            AlertSeverity::Critical,
            "High Disk Usage",
            format!(
                "Disk usage is {:.1}%, exceeding threshold of {:.1}%",
                metrics.system.disk_usage, self.config.disk_threshold
            ),
            HashMap::from([
                ("disk_usage".to_string(), json!(metrics.system.disk_usage)),
                ("threshold".to_string(), json!(self.config.disk_threshold)),
            ]),
        );

        // Address pool: medium above 90%, high above 95%.
        let utilization = metrics.network.ip_pool_utilization;
        let pool_severity = if utilization > 95.0 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        Self::apply_rule(
            &mut alerts,
            now,
            utilization > 90.0,
            "network_ip_pool_high",
            AlertType::Network,
            pool_severity,
            "High IP Pool Utilization",
            format!("IP pool utilization is {utilization:.1}%, nearing capacity"),
            HashMap::from([("utilization".to_string(), json!(utilization))]),
        );

        // Security.
        Self::apply_rule(
            &mut alerts,
            now,
            !metrics.security.firewall_enabled,
            "security_firewall_disabled",
            AlertType::Security,
            AlertSeverity::Critical,
            "Firewall Disabled",
            "The packet filter is disabled, leaving the server unprotected".to_string(),
            HashMap::from([(
                "firewall_enabled".to_string(),
                json!(metrics.security.firewall_enabled),
            )]),
        );
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.security.failed_logins > 10,
            "security_failed_logins",
            AlertType::Security,
            AlertSeverity::Medium,
            "High Failed Login Attempts",
            format!("Detected {} failed login attempts", metrics.security.failed_logins),
            HashMap::from([(
                "failed_logins".to_string(),
                json!(metrics.security.failed_logins),
            )]),
        );

        // Connections.
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.connections.active_peers > self.config.connection_threshold,
            "connection_high_count",
            AlertType::Connection,
            AlertSeverity::Medium,
            "High Active Connection Count",
            format!(
                "Active connections ({}) exceed threshold ({})",
                metrics.connections.active_peers, self.config.connection_threshold
            ),
            HashMap::from([
                (
                    "active_peers".to_string(),
                    json!(metrics.connections.active_peers),
                ),
                (
                    "threshold".to_string(),
                    json!(self.config.connection_threshold),
                ),
            ]),
        );

        // Performance.
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.performance.response_time_ms > self.config.response_time_threshold_ms,
            "performance_response_time",
            AlertType::Performance,
            AlertSeverity::Medium,
            "High Response Time",
            format!(
                "Response time ({}ms) exceeds threshold ({}ms)",
                metrics.performance.response_time_ms, self.config.response_time_threshold_ms
            ),
            HashMap::from([
                (
                    "response_time_ms".to_string(),
                    json!(metrics.performance.response_time_ms),
                ),
                (
                    "threshold_ms".to_string(),
                    json!(self.config.response_time_threshold_ms),
                ),
            ]),
        );
        Self::apply_rule(
            &mut alerts,
            now,
            metrics.performance.error_rate > self.config.error_rate_threshold,
            "performance_error_rate",
            AlertType::Performance,
            AlertSeverity::High,
            "High Error Rate",
            format!(
                "Error rate ({:.1}%) exceeds threshold ({:.1}%)",
                metrics.performance.error_rate, self.config.error_rate_threshold
            ),
            HashMap::from([
                ("error_rate".to_string(), json!(metrics.performance.error_rate)),
                (
                    "threshold".to_string(),
                    json!(self.config.error_rate_threshold),
                ),
            ]),
        );

        Self::expire_suppressions(&mut alerts, now);
        Self::cleanup_resolved(&mut alerts, now);
    }

    /// Active alerts only; suppressed ones are hidden here but still
    /// returned by [`Self::all_alerts`].
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active
    }

    pub fn all_alerts(&self, since: DateTime<Utc>) -> Vec<Alert> {
        let mut all: Vec<Alert> = self
            .alerts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.created_at > since)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Manual resolution by an operator.
    pub fn resolve(&self, id: &str) -> Result<()> {
        let mut alerts = self.alerts.lock().unwrap();
        let alert = alerts
            .get_mut(id)
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::AlreadyResolved(id.to_string()));
        }

        let now = Utc::now();
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.updated_at = now;
        info!(alert_id = id, "alert manually resolved");
        Ok(())
    }

    /// Hide an alert from the active list for `duration`. It reappears on
    /// the first evaluation after the window ends.
    pub fn suppress(&self, id: &str, duration: Duration) -> Result<()> {
        let mut alerts = self.alerts.lock().unwrap();
        let alert = alerts
            .get_mut(id)
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        let now = Utc::now();
        alert.status = AlertStatus::Suppressed;
        alert.updated_at = now;
        alert
            .metadata
            .insert("suppressed_until".to_string(), json!(now + duration));
        info!(alert_id = id, "alert suppressed");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_rule(
        alerts: &mut HashMap<String, Alert>,
        now: DateTime<Utc>,
        triggered: bool,
        id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        title: &str,
        description: String,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        if triggered {
            match alerts.get_mut(id) {
                // Suppressed alerts keep accumulating triggers silently.
                Some(alert) if alert.status != AlertStatus::Resolved => {
                    alert.count += 1;
                    alert.updated_at = now;
                    alert.severity = severity;
                    alert.description = description;
                    alert.metadata.extend(metadata);
                }
                _ => {
                    debug!(alert_id = id, "alert triggered");
                    alerts.insert(
                        id.to_string(),
                        Alert {
                            id: id.to_string(),
                            alert_type,
                            severity,
                            title: title.to_string(),
                            description,
                            created_at: now,
                            updated_at: now,
                            resolved_at: None,
                            status: AlertStatus::Active,
                            metadata,
                            count: 1,
                        },
                    );
                }
            }
        } else if let Some(alert) = alerts.get_mut(id) {
            if alert.status == AlertStatus::Active {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(now);
                alert.updated_at = now;
                debug!(alert_id = id, "alert condition cleared");
            }
        }
    }

    fn expire_suppressions(alerts: &mut HashMap<String, Alert>, now: DateTime<Utc>) {
        for alert in alerts.values_mut() {
            if alert.status != AlertStatus::Suppressed {
                continue;
            }
            let expired = alert
                .metadata
                .get("suppressed_until")
                .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
                .map_or(true, |until| until <= now);
            if expired {
                alert.status = AlertStatus::Active;
                alert.updated_at = now;
            }
        }
    }

    fn cleanup_resolved(alerts: &mut HashMap<String, Alert>, now: DateTime<Utc>) {
        alerts.retain(|_, alert| match (alert.status, alert.resolved_at) {
            (AlertStatus::Resolved, Some(resolved_at)) => {
                now - resolved_at <= RESOLVED_RETENTION
            }
            _ => true,
        });
    }

    #[cfg(test)]
    fn insert_for_test(&self, alert: Alert) {
        self.alerts.lock().unwrap().insert(alert.id.clone(), alert);
    }
}
