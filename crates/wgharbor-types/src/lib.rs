//! wgharbor-types: Shared model definitions for the wgharbor control plane.
//!
//! This crate contains the metrics, alert, and health-status types shared
//! between the monitoring engine and the admin API responses.

#![warn(missing_docs)]

pub mod alert;
pub mod metrics;

pub use alert::{Alert, AlertConfig, AlertSeverity, AlertStatus, AlertType};
pub use metrics::{
    ConnectionStats, HealthStatus, NetworkStats, PerformanceStats, SecurityStats, ServerMetrics,
    SystemStats, WireGuardStats,
};
