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

use std::net::Ipv4Addr;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wgharbor_core::{
    generate_keypair, IpPool, PeerStanza, PfctlManager, ServerConfig as WgInterfaceConfig,
    VpnRuleConfig, WgServer,
};

use crate::config::Config;
use crate::db::vpn::{ConnectionLogEntry, ServerConfigRow, VpnStore};
use crate::error::ApiError;
use crate::extract::AuthUser;

#[derive(Debug, Deserialize)]
struct UpdateServerConfigRequest {
    listen_port: Option<u16>,
    dns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct InitializeServerRequest {
    network: String,
    listen_port: u16,
    dns: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ServerConfigResponse {
    network: String,
    server_ip: Ipv4Addr,
    interface: String,
    listen_port: u16,
    dns: Vec<String>,
    public_key: String,
    private_key: String,
    network_address: Ipv4Addr,
    broadcast_address: Ipv4Addr,
    total_hosts: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct LogEntry {
    id: i64,
    client_id: Uuid,
    client: String,
    action: String,
    timestamp: DateTime<Utc>,
    ip_address: String,
}

impl From<&ConnectionLogEntry> for LogEntry {
    fn from(e: &ConnectionLogEntry) -> Self {
        Self {
            id: e.id,
            client_id: e.peer_id,
            client: e.peer_name.clone(),
            action: e.action.clone(),
            timestamp: e.timestamp,
            ip_address: e.remote_address.clone(),
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/server")
            .route("/status", web::get().to(status))
            .route("/start", web::post().to(start))
            .route("/stop", web::post().to(stop))
            .route("/restart", web::post().to(restart))
            .route("/config", web::get().to(get_config))
            .route("/config", web::put().to(update_config))
            .route("/initialize", web::post().to(initialize))
            .route("/logs", web::get().to(logs)),
    );
}

/// Load the singleton config, creating one with a fresh key pair from the
/// environment defaults on first use.
pub async fn ensure_server_config(
    store: &VpnStore,
    config: &Config,
) -> Result<ServerConfigRow, ApiError> {
    if let Some(row) = store.get_server_config().await? {
        return Ok(row);
    }

    let keypair = generate_keypair();
    let row = store
        .replace_server_config(
            &keypair.private_key,
            &keypair.public_key,
            config.listen_port,
            &config.vpn_network,
            &config.wg_interface,
            &config.dns_servers,
        )
        .await?;
    tracing::info!(interface = %row.interface, "server configuration initialized");
    Ok(row)
}

fn config_response(row: &ServerConfigRow, pool: &IpPool) -> ServerConfigResponse {
    let info = pool.network_info();
    ServerConfigResponse {
        network: row.network.clone(),
        server_ip: info.server_ip,
        interface: row.interface.clone(),
        listen_port: row.listen_port as u16,
        dns: row.dns_list(),
        public_key: row.public_key.clone(),
        private_key: row.private_key.clone(),
        network_address: info.network_address,
        broadcast_address: info.broadcast_address,
        total_hosts: info.total_hosts,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

async fn status(_auth: AuthUser, wg: web::Data<WgServer>) -> Result<HttpResponse, ApiError> {
    let status = wg.status().await?;
    Ok(HttpResponse::Ok().json(status))
}

/// Materialise the stored config plus every peer row into the interface
/// file, bring the interface up, then install the firewall rules.
#[tracing::instrument(skip_all)]
async fn start(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    config: web::Data<Config>,
    pool: web::Data<IpPool>,
    wg: web::Data<WgServer>,
    firewall: web::Data<PfctlManager>,
) -> Result<HttpResponse, ApiError> {
    let row = ensure_server_config(&store, &config).await?;

    let interface_config = WgInterfaceConfig {
        private_key: row.private_key.clone(),
        public_key: row.public_key.clone(),
        address: format!("{}/{}", pool.server_ip(), pool.prefix()),
        listen_port: row.listen_port as u16,
        dns: row.dns_list(),
        post_up: vec![],
        post_down: vec![],
        interface: row.interface.clone(),
    };

    let peers = store.list_peers().await?;
    let stanzas: Vec<PeerStanza> = peers
        .iter()
        .map(|p| PeerStanza::for_client(&p.public_key, &p.address))
        .collect();

    wg.write_config_with_peers(&interface_config, &stanzas).await?;
    wg.start().await?;

    // NAT and forwarding are the packet filter's job; a refusal (missing
    // tooling, no privileges) degrades rather than failing the start.
    let rules = VpnRuleConfig {
        interface: row.interface.clone(),
        vpn_network: row.network.clone(),
        external_interface: config.external_interface.clone(),
        listen_port: Some(row.listen_port as u16),
        allowed_ports: vec![],
    };
    if let Err(e) = firewall.enable(&rules).await {
        tracing::warn!(error = %e, "failed to install firewall rules");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Server started successfully" })))
}

#[tracing::instrument(skip_all)]
async fn stop(
    _auth: AuthUser,
    wg: web::Data<WgServer>,
    firewall: web::Data<PfctlManager>,
) -> Result<HttpResponse, ApiError> {
    wg.stop().await?;

    if let Err(e) = firewall.disable().await {
        tracing::warn!(error = %e, "failed to remove firewall rules");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Server stopped successfully" })))
}

#[tracing::instrument(skip_all)]
async fn restart(_auth: AuthUser, wg: web::Data<WgServer>) -> Result<HttpResponse, ApiError> {
    wg.restart().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Server restarted successfully" })))
}

async fn get_config(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    config: web::Data<Config>,
    pool: web::Data<IpPool>,
) -> Result<HttpResponse, ApiError> {
    let row = ensure_server_config(&store, &config).await?;
    Ok(HttpResponse::Ok().json(config_response(&row, &pool)))
}

async fn update_config(
    _auth: AuthUser,
    body: web::Json<UpdateServerConfigRequest>,
    store: web::Data<VpnStore>,
    config: web::Data<Config>,
    pool: web::Data<IpPool>,
) -> Result<HttpResponse, ApiError> {
    if body.listen_port == Some(0) {
        return Err(ApiError::Validation(
            "Listen port must be between 1 and 65535".to_string(),
        ));
    }

    ensure_server_config(&store, &config).await?;
    let row = store
        .update_server_config(body.listen_port, body.dns.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(config_response(&row, &pool)))
}

/// Replace the singleton config with a fresh key pair. The address pool
/// is built from the network at startup, so a network change takes
/// effect on the next process start.
#[tracing::instrument(skip_all)]
async fn initialize(
    _auth: AuthUser,
    body: web::Json<InitializeServerRequest>,
    store: web::Data<VpnStore>,
    config: web::Data<Config>,
    pool: web::Data<IpPool>,
) -> Result<HttpResponse, ApiError> {
    if body.listen_port == 0 {
        return Err(ApiError::Validation(
            "Listen port must be between 1 and 65535".to_string(),
        ));
    }
    // Probe the network the same way the pool will.
    IpPool::new(&body.network)?;

    let keypair = generate_keypair();
    let dns = body.dns.clone().unwrap_or_else(|| config.dns_servers.clone());
    let row = store
        .replace_server_config(
            &keypair.private_key,
            &keypair.public_key,
            body.listen_port,
            &body.network,
            &config.wg_interface,
            &dns,
        )
        .await?;

    tracing::info!(network = %row.network, "server reinitialized, restart required for pool changes");
    Ok(HttpResponse::Ok().json(config_response(&row, &pool)))
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
    let logs: Vec<LogEntry> = entries.iter().map(LogEntry::from).collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "logs": logs,
        "total": logs.len(),
    })))
}
