//! Alert model and threshold configuration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Host resource alerts (CPU, memory, disk).
    System,
    /// Address-pool and traffic alerts.
    Network,
    /// Firewall and login alerts.
    Security,
    /// Peer connection alerts.
    Connection,
    /// Response-time and error-rate alerts.
    Performance,
    /// Anything raised by the application itself.
    Application,
}

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational.
    Low,
    /// Requires attention.
    Medium,
    /// Requires immediate attention.
    High,
    /// System at risk.
    Critical,
}

/// Lifecycle state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition currently holds.
    Active,
    /// Condition cleared, or resolved by an operator.
    Resolved,
    /// Hidden from the active list until the suppression window ends.
    Suppressed,
}

/// A deduplicated alert. At most one alert exists per `id`; re-triggers
/// while active bump `count` and `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identifier derived from the triggering condition
    /// (e.g. `system_cpu_high`).
    pub id: String,
    /// Category of the alert.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Severity at last evaluation.
    pub severity: AlertSeverity,
    /// Short human-readable title.
    pub title: String,
    /// Detailed description including the observed value.
    pub description: String,
    /// First trigger time.
    pub created_at: DateTime<Utc>,
    /// Last trigger or state-change time.
    pub updated_at: DateTime<Utc>,
    /// Set when transitioning to [`AlertStatus::Resolved`].
    pub resolved_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: AlertStatus,
    /// Free-form condition metadata (observed values, thresholds).
    pub metadata: HashMap<String, serde_json::Value>,
    /// Number of times this alert has been triggered.
    pub count: u32,
}

/// Threshold configuration for the built-in alert rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// CPU usage percentage above which `system_cpu_high` fires.
    pub cpu_threshold: f64,
    /// Memory usage percentage above which `system_memory_high` fires.
    pub memory_threshold: f64,
    /// Disk usage percentage above which `system_disk_high` fires.
    pub disk_threshold: f64,
    /// Active peer count above which `connection_high_count` fires.
    pub connection_threshold: i64,
    /// Response time in milliseconds above which
    /// `performance_response_time` fires.
    pub response_time_threshold_ms: u64,
    /// Error-rate percentage above which `performance_error_rate` fires.
    pub error_rate_threshold: f64,
    /// Master switch; when false no rules are evaluated.
    pub enabled: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            disk_threshold: 90.0,
            connection_threshold: 1000,
            response_time_threshold_ms: 5_000,
            error_rate_threshold: 5.0,
            enabled: true,
        }
    }
}
