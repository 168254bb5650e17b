use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing::{info, warn};

use wgharbor_api::config::Config;
use wgharbor_api::db::{self, user::UserStore, vpn::VpnStore};
use wgharbor_api::middleware::AccessLog;
use wgharbor_api::monitor::{Monitor, MonitorConfig};
use wgharbor_api::routes;
use wgharbor_core::{IpPool, PfctlManager, WgServer};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    info!(addr = %config.bind_addr, "starting wgharbor-api");

    let pool = db::create_pool(&config.database_url).await;
    db::migrate(&pool).await;
    info!("database migrations applied");

    let user_store = UserStore::new(pool.clone());
    let vpn_store = VpnStore::new(pool.clone());

    let server_row = routes::server_routes::ensure_server_config(&vpn_store, &config)
        .await
        .expect("failed to initialize server configuration");

    let ip_pool = Arc::new(IpPool::new(&server_row.network).expect("invalid VPN network"));

    // Restore pool state: every persisted peer keeps its slot across
    // restarts.
    let peers = vpn_store
        .list_peers()
        .await
        .expect("failed to load peers at startup");
    for peer in &peers {
        if let Err(e) = ip_pool.allocate_specific(&peer.address) {
            warn!(peer_id = %peer.id, address = %peer.address, error = %e,
                "failed to re-mark peer address as allocated");
        }
    }
    info!(
        peer_count = peers.len(),
        available = ip_pool.available_count(),
        "address pool restored"
    );

    let wg = WgServer::new(config.wg_config_dir.clone(), config.wg_interface.clone());
    let firewall = PfctlManager::new();

    let monitor = Monitor::new(
        vpn_store.clone(),
        wg.clone(),
        Arc::clone(&ip_pool),
        firewall.clone(),
        MonitorConfig::default(),
    );
    monitor.start().expect("failed to start monitoring");

    let bind = config.bind_addr.clone();

    let config_data = web::Data::new(config);
    let user_data = web::Data::new(user_store);
    let vpn_data = web::Data::new(vpn_store);
    let pool_data = web::Data::from(Arc::clone(&ip_pool));
    let wg_data = web::Data::new(wg);
    let firewall_data = web::Data::new(firewall);
    let monitor_data = web::Data::new(monitor.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(user_data.clone())
            .app_data(vpn_data.clone())
            .app_data(pool_data.clone())
            .app_data(wg_data.clone())
            .app_data(firewall_data.clone())
            .app_data(monitor_data.clone())
            .wrap(Cors::permissive())
            .wrap(AccessLog)
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(routes::configure)
    })
    .client_request_timeout(Duration::from_secs(10))
    .bind(&bind)?
    .run();

    let result = server.await;

    if let Err(e) = monitor.stop().await {
        warn!(error = %e, "monitor was not running at shutdown");
    }
    info!("shutdown complete");

    result
}
