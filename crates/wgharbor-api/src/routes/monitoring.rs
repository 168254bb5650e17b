use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::vpn::VpnStore;
use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::monitor::Monitor;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/monitoring")
            .route("/metrics", web::get().to(metrics))
            .route("/alerts", web::get().to(alerts))
            .route("/alerts/{id}/resolve", web::post().to(resolve_alert))
            .route("/alerts/{id}/suppress", web::post().to(suppress_alert))
            .route("/logs", web::get().to(logs)),
    );
}

async fn metrics(_auth: AuthUser, monitor: web::Data<Monitor>) -> HttpResponse {
    HttpResponse::Ok().json(monitor.get_metrics())
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    /// When set, include resolved and suppressed alerts created after
    /// this instant instead of only the active ones.
    since: Option<DateTime<Utc>>,
}

async fn alerts(
    _auth: AuthUser,
    monitor: web::Data<Monitor>,
    query: web::Query<AlertsQuery>,
) -> HttpResponse {
    let alerts = match query.since {
        Some(since) => monitor.alert_manager().all_alerts(since),
        None => monitor.alert_manager().active_alerts(),
    };
    HttpResponse::Ok().json(serde_json::json!({
        "alerts": alerts,
        "total": alerts.len(),
    }))
}

async fn resolve_alert(
    _auth: AuthUser,
    monitor: web::Data<Monitor>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    monitor.alert_manager().resolve(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Alert resolved" })))
}

#[derive(Debug, Deserialize)]
struct SuppressRequest {
    duration_secs: i64,
}

async fn suppress_alert(
    _auth: AuthUser,
    monitor: web::Data<Monitor>,
    path: web::Path<String>,
    body: web::Json<SuppressRequest>,
) -> Result<HttpResponse, ApiError> {
    if body.duration_secs <= 0 {
        return Err(ApiError::Validation(
            "duration_secs must be positive".to_string(),
        ));
    }
    monitor
        .alert_manager()
        .suppress(&path.into_inner(), chrono::Duration::seconds(body.duration_secs))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Alert suppressed" })))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<i64>,
}

async fn logs(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    query: web::Query<LogsQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.filter(|&l| l > 0).unwrap_or(50);
    let entries = store.list_connection_logs(limit).await?;
    let logs: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "client_id": e.peer_id,
                "client": e.peer_name,
                "action": e.action,
                "timestamp": e.timestamp,
                "ip_address": e.remote_address,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "logs": logs,
        "total": logs.len(),
    })))
}
