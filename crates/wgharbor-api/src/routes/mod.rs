pub mod auth;
pub mod clients;
pub mod monitoring;
pub mod server_routes;

use actix_web::{web, HttpResponse};

use crate::extract::MaybeAuthUser;

/// Liveness probe. Also notes whether the caller presented a valid
/// token, which the dashboard uses to decide between login and overview.
async fn health(auth: MaybeAuthUser) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "authenticated": auth.0.is_some(),
    }))
}

/// Mount the health probe and the versioned API surface.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1")
            .configure(auth::configure)
            .configure(clients::configure)
            .configure(server_routes::configure)
            .configure(monitoring::configure),
    );
}
