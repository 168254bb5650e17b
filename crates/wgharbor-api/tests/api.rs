use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{test, web, App};
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

use wgharbor_api::auth::create_token_with_lifetime;
use wgharbor_api::config::Config;
use wgharbor_api::db::{self, user::UserStore, vpn::VpnStore};
use wgharbor_api::monitor::{Monitor, MonitorConfig};
use wgharbor_api::routes;
use wgharbor_core::{IpPool, PfctlManager, WgServer};

const JWT_SECRET: &str = "integration-test-secret";

struct TestCtx {
    config: web::Data<Config>,
    users: web::Data<UserStore>,
    vpn: web::Data<VpnStore>,
    pool: web::Data<IpPool>,
    wg: web::Data<WgServer>,
    firewall: web::Data<PfctlManager>,
    monitor: web::Data<Monitor>,
    _dir: TempDir,
}

async fn ctx() -> TestCtx {
    let dir = TempDir::new().unwrap();

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        wg_config_dir: PathBuf::from(dir.path()),
        wg_interface: "wg-test".to_string(),
        listen_port: 51820,
        vpn_network: "10.0.0.0/24".to_string(),
        external_interface: "en0".to_string(),
        endpoint_host: "vpn.test.example".to_string(),
        dns_servers: vec!["1.1.1.1".to_string()],
    };

    let db_pool = db::create_pool(&config.database_url).await;
    db::migrate(&db_pool).await;

    let users = UserStore::new(db_pool.clone());
    let vpn = VpnStore::new(db_pool);
    let ip_pool = Arc::new(IpPool::new(&config.vpn_network).unwrap());
    let wg = WgServer::new(dir.path(), "wg-test");
    let firewall = PfctlManager::with_paths(dir.path().join("pf.conf"), dir.path().join("vpn.conf"));
    let monitor = Monitor::new(
        vpn.clone(),
        wg.clone(),
        Arc::clone(&ip_pool),
        firewall.clone(),
        MonitorConfig {
            enable_system_stats: false,
            ..Default::default()
        },
    );

    TestCtx {
        config: web::Data::new(config),
        users: web::Data::new(users),
        vpn: web::Data::new(vpn),
        pool: web::Data::from(ip_pool),
        wg: web::Data::new(wg),
        firewall: web::Data::new(firewall),
        monitor: web::Data::new(monitor),
        _dir: dir,
    }
}

macro_rules! app {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data($ctx.config.clone())
                .app_data($ctx.users.clone())
                .app_data($ctx.vpn.clone())
                .app_data($ctx.pool.clone())
                .app_data($ctx.wg.clone())
                .app_data($ctx.firewall.clone())
                .app_data($ctx.monitor.clone())
                .configure(routes::configure),
        )
        .await
    };
}

macro_rules! register {
    ($app:expr, $username:expr, $email:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/register")
            .set_json(json!({
                "username": $username,
                "email": $email,
                "password": "pw12345678",
            }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), 201, "register should succeed");
        let body: Value = test::read_body_json(resp).await;
        body
    }};
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

#[actix_web::test]
async fn health_reports_authentication_state() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["authenticated"], false);

    let token = register!(app, "probe", "probe@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::get()
        .uri("/health")
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["authenticated"], true);
}

#[actix_web::test]
async fn register_login_and_create_peer() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let registered = register!(app, "u1", "u1@x");
    assert!(registered["token"].as_str().is_some());
    assert_eq!(registered["user"]["username"], "u1");
    // Password material never appears in responses.
    assert!(registered["user"].get("password").is_none());
    assert!(registered["user"].get("password_hash").is_none());

    // Fresh login works too.
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({ "username": "u1", "password": "pw12345678" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let login: Value = test::read_body_json(resp).await;
    let token = login["token"].as_str().unwrap().to_string();
    assert!(login["user"]["last_login"].as_str().is_some());

    // Create a peer: first usable client address.
    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "laptop" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["ip_address"], "10.0.0.2");
    assert_eq!(created["enabled"], true);
    let peer_id = created["id"].as_str().unwrap().to_string();

    // Its rendered config points at the server.
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/clients/{peer_id}/config"))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    let rendered = body["config"].as_str().unwrap();
    assert!(rendered.contains("[Interface]"));
    assert!(rendered.contains("Address = 10.0.0.2/32"));
    assert!(rendered.contains("[Peer]"));
    assert!(rendered.contains("Endpoint = vpn.test.example:51820"));
    assert!(rendered.contains("PersistentKeepalive = 25"));

    // The [Peer] public key is the server's.
    let req = test::TestRequest::get()
        .uri("/api/v1/server/config")
        .insert_header(bearer(&token))
        .to_request();
    let server_config: Value = test::call_and_read_body_json(&app, req).await;
    let server_pub = server_config["public_key"].as_str().unwrap();
    assert!(rendered.contains(&format!("PublicKey = {server_pub}")));
}

#[actix_web::test]
async fn duplicate_username_is_a_conflict() {
    let ctx = ctx().await;
    let app = app!(ctx);

    register!(app, "u1", "u1@x");

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({
            "username": "u1",
            "email": "different@x",
            "password": "pw12345678",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Username already exists");
}

#[actix_web::test]
async fn deleted_peer_address_is_reused() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "first" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let first_ip = created["ip_address"].as_str().unwrap().to_string();
    let peer_id = created["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/clients/{peer_id}"))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    // The freed slot is the first candidate again.
    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "second" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created["ip_address"].as_str().unwrap(), first_ip);
}

#[actix_web::test]
async fn auth_rejections_are_distinct() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/profile")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Authorization header is required");

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/profile")
        .insert_header(("Authorization", "Basic dXNlcjpwdw=="))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Authorization header must start with 'Bearer '");

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/profile")
        .insert_header(("Authorization", "Bearer "))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "JWT token is required");

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/profile")
        .insert_header(("Authorization", "Bearer not.a.token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid or expired token");
}

#[actix_web::test]
async fn expired_token_is_rejected() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let registered = register!(app, "u1", "u1@x");
    let user_id: Uuid = registered["user"]["id"].as_str().unwrap().parse().unwrap();

    let (expired, _) =
        create_token_with_lifetime(user_id, "u1", JWT_SECRET, chrono::Duration::seconds(-5))
            .unwrap();

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/profile")
        .insert_header(bearer(&expired))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid or expired token");
}

#[actix_web::test]
async fn qr_formats_switch_correctly() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "laptop" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let peer_id = created["id"].as_str().unwrap().to_string();

    // PNG: binary body with the PNG magic and an inline disposition.
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/clients/{peer_id}/qr?format=png"))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "image/png"
    );
    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(&format!("client-{peer_id}-config.png")));
    let body = test::read_body(resp).await;
    assert_eq!(&body[..4], &[0x89, b'P', b'N', b'G']);

    // Base64: JSON with a data URL.
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/clients/{peer_id}/qr?format=base64"))
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["data"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert_eq!(body["format"], "base64");

    // Terminal: JSON with block art.
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/clients/{peer_id}/qr?format=terminal"))
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["data"].as_str().unwrap().contains("██"));

    // Unknown format: rejected before the peer is even loaded.
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/clients/{peer_id}/qr?format=bogus"))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn client_update_and_not_found() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "laptop" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let peer_id = created["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/clients/{peer_id}"))
        .insert_header(bearer(&token))
        .set_json(json!({ "enabled": false, "name": "desktop" }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["enabled"], false);
    assert_eq!(updated["name"], "desktop");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/clients/{}", Uuid::new_v4()))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Client not found");
}

#[actix_web::test]
async fn create_requires_a_name_and_a_token() {
    let ctx = ctx().await;
    let app = app!(ctx);

    // No token at all.
    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .set_json(json!({ "name": "laptop" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    // Blank name.
    let req = test::TestRequest::post()
        .uri("/api/v1/clients")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "  " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn profile_and_password_change_flow() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::put()
        .uri("/api/v1/auth/profile")
        .insert_header(bearer(&token))
        .set_json(json!({ "email": "new@x" }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["email"], "new@x");

    // Wrong current password is refused.
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/change-password")
        .insert_header(bearer(&token))
        .set_json(json!({ "current_password": "wrong", "new_password": "pw987654321" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/change-password")
        .insert_header(bearer(&token))
        .set_json(json!({ "current_password": "pw12345678", "new_password": "pw987654321" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // Old password no longer logs in.
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({ "username": "u1", "password": "pw12345678" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({ "username": "u1", "password": "pw987654321" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn token_refresh_and_logout() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .set_json(json!({ "token": token }))
        .to_request();
    let refreshed: Value = test::call_and_read_body_json(&app, req).await;
    let new_token = refreshed["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/profile")
        .insert_header(bearer(&new_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/logout")
        .insert_header(bearer(&new_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn server_config_and_logs_endpoints() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::get()
        .uri("/api/v1/server/config")
        .insert_header(bearer(&token))
        .to_request();
    let config: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(config["network"], "10.0.0.0/24");
    assert_eq!(config["server_ip"], "10.0.0.1");
    assert_eq!(config["listen_port"], 51820);
    assert_eq!(config["total_hosts"], 254);
    assert_eq!(config["public_key"].as_str().unwrap().len(), 44);

    // Update the mutable settings.
    let req = test::TestRequest::put()
        .uri("/api/v1/server/config")
        .insert_header(bearer(&token))
        .set_json(json!({ "listen_port": 51900, "dns": ["9.9.9.9"] }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["listen_port"], 51900);
    assert_eq!(updated["dns"][0], "9.9.9.9");
    // The key pair is untouched by a settings update.
    assert_eq!(updated["public_key"], config["public_key"]);

    let req = test::TestRequest::get()
        .uri("/api/v1/server/logs?limit=10")
        .insert_header(bearer(&token))
        .to_request();
    let logs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(logs["total"], 0);
}

#[actix_web::test]
async fn initialize_replaces_the_key_pair_and_validates_input() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::get()
        .uri("/api/v1/server/config")
        .insert_header(bearer(&token))
        .to_request();
    let before: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/server/initialize")
        .insert_header(bearer(&token))
        .set_json(json!({ "network": "10.9.0.0/24", "listen_port": 51821 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let after: Value = test::read_body_json(resp).await;
    assert_eq!(after["network"], "10.9.0.0/24");
    assert_ne!(after["public_key"], before["public_key"]);

    // A too-small network is refused.
    let req = test::TestRequest::post()
        .uri("/api/v1/server/initialize")
        .insert_header(bearer(&token))
        .set_json(json!({ "network": "10.9.0.0/30", "listen_port": 51821 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn monitoring_endpoints_respond() {
    let ctx = ctx().await;
    let app = app!(ctx);

    let token = register!(app, "u1", "u1@x")["token"]
        .as_str()
        .unwrap()
        .to_string();

    ctx.monitor.collect_now().await;

    let req = test::TestRequest::get()
        .uri("/api/v1/monitoring/metrics")
        .insert_header(bearer(&token))
        .to_request();
    let metrics: Value = test::call_and_read_body_json(&app, req).await;
    assert!(metrics["timestamp"].as_str().is_some());
    // No packet filter in the test environment.
    assert_eq!(metrics["server_status"], "degraded");
    assert_eq!(metrics["security"]["firewall_enabled"], false);

    let req = test::TestRequest::get()
        .uri("/api/v1/monitoring/alerts")
        .insert_header(bearer(&token))
        .to_request();
    let alerts: Value = test::call_and_read_body_json(&app, req).await;
    assert!(alerts["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["id"] == "security_firewall_disabled"));

    // Suppress then resolve through the API.
    let req = test::TestRequest::post()
        .uri("/api/v1/monitoring/alerts/security_firewall_disabled/suppress")
        .insert_header(bearer(&token))
        .set_json(json!({ "duration_secs": 3600 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri("/api/v1/monitoring/alerts")
        .insert_header(bearer(&token))
        .to_request();
    let alerts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(alerts["total"], 0);

    let req = test::TestRequest::post()
        .uri("/api/v1/monitoring/alerts/security_firewall_disabled/resolve")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri("/api/v1/monitoring/logs")
        .insert_header(bearer(&token))
        .to_request();
    let logs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(logs["total"], 0);
}
