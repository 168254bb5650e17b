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

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wgharbor_core::qr::{wireguard_config_qr, QrFormat, QrOutput};
use wgharbor_core::{generate_keypair, ClientConfig, IpPool, PeerStanza, WgServer};

use crate::config::Config;
use crate::db::vpn::{Peer, VpnStore};
use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::routes::server_routes::ensure_server_config;

#[derive(Debug, Deserialize)]
struct CreateClientRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateClientRequest {
    name: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateClientResponse {
    id: Uuid,
    name: String,
    public_key: String,
    ip_address: String,
    enabled: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ClientResponse {
    id: Uuid,
    name: String,
    public_key: String,
    ip_address: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_handshake: Option<DateTime<Utc>>,
    bytes_received: i64,
    bytes_sent: i64,
}

impl From<&Peer> for ClientResponse {
    fn from(p: &Peer) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            public_key: p.public_key.clone(),
            ip_address: p.address.clone(),
            enabled: p.enabled,
            created_at: p.created_at,
            updated_at: p.updated_at,
            last_handshake: p.last_handshake,
            bytes_received: p.bytes_received,
            bytes_sent: p.bytes_sent,
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/clients")
            .route("", web::post().to(create_client))
            .route("", web::get().to(list_clients))
            .route("/{id}", web::get().to(get_client))
            .route("/{id}", web::put().to(update_client))
            .route("/{id}", web::delete().to(delete_client))
            .route("/{id}/config", web::get().to(client_config))
            .route("/{id}/qr", web::get().to(client_qr)),
    );
}

/// Create-peer path: key pair, pool slot, row, then the live config.
/// A failed insert releases the slot; a failed config append is logged
/// and reconciled on the next server start.
#[tracing::instrument(skip_all, fields(name = %body.name))]
async fn create_client(
    _auth: AuthUser,
    body: web::Json<CreateClientRequest>,
    store: web::Data<VpnStore>,
    pool: web::Data<IpPool>,
    wg: web::Data<WgServer>,
) -> Result<HttpResponse, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }

    let keypair = generate_keypair();
    let address = pool.allocate()?;

    let peer = match store
        .create_peer(name, &keypair.public_key, &keypair.private_key, &address.to_string())
        .await
    {
        Ok(peer) => peer,
        Err(e) => {
            if let Err(release_err) = pool.release(&address.to_string()) {
                tracing::warn!(error = %release_err, "failed to release address after rollback");
            }
            return Err(e.into());
        }
    };

    let stanza = PeerStanza::for_client(&peer.public_key, &peer.address);
    if let Err(e) = wg.add_peer(&stanza).await {
        tracing::warn!(error = %e, peer_id = %peer.id, "failed to append peer to live config");
    }

    tracing::info!(peer_id = %peer.id, address = %peer.address, "peer created");

    Ok(HttpResponse::Created().json(CreateClientResponse {
        id: peer.id,
        name: peer.name,
        public_key: peer.public_key,
        ip_address: peer.address,
        enabled: peer.enabled,
        created_at: peer.created_at,
    }))
}

async fn list_clients(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
) -> Result<HttpResponse, ApiError> {
    let peers = store.list_peers().await?;
    let clients: Vec<ClientResponse> = peers.iter().map(ClientResponse::from).collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "clients": clients,
        "total": clients.len(),
    })))
}

async fn get_client(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let peer = store
        .get_peer(path.into_inner())
        .await?
        .ok_or(ApiError::ClientNotFound)?;
    Ok(HttpResponse::Ok().json(ClientResponse::from(&peer)))
}

async fn update_client(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateClientRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(ref name) = body.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("name is required".to_string()));
        }
    }

    let peer = store
        .update_peer(path.into_inner(), body.name.as_deref(), body.enabled)
        .await?;
    Ok(HttpResponse::Ok().json(ClientResponse::from(&peer)))
}

/// Best-effort teardown of the live config and pool slot; the row delete
/// is what must not fail.
#[tracing::instrument(skip_all)]
async fn delete_client(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    pool: web::Data<IpPool>,
    wg: web::Data<WgServer>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let peer = store.get_peer(id).await?.ok_or(ApiError::ClientNotFound)?;

    if let Err(e) = wg.remove_peer(&peer.public_key).await {
        tracing::warn!(error = %e, peer_id = %id, "failed to remove peer from live config");
    }
    if let Err(e) = pool.release(&peer.address) {
        tracing::warn!(error = %e, peer_id = %id, "failed to release peer address");
    }

    store.delete_peer(id).await?;
    tracing::info!(peer_id = %id, "peer deleted");

    Ok(HttpResponse::NoContent().finish())
}

async fn render_client_config(
    store: &VpnStore,
    config: &Config,
    peer: &Peer,
) -> Result<String, ApiError> {
    let server = ensure_server_config(store, config).await?;
    let client = ClientConfig {
        private_key: peer.private_key.clone(),
        address: format!("{}/32", peer.address),
        dns: server.dns_list(),
        server_public_key: server.public_key,
        server_endpoint: format!("{}:{}", config.endpoint_host, server.listen_port),
        allowed_ips: vec!["0.0.0.0/0".to_string()],
    };
    Ok(client.render())
}

async fn client_config(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    config: web::Data<Config>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let peer = store
        .get_peer(path.into_inner())
        .await?
        .ok_or(ApiError::ClientNotFound)?;
    let rendered = render_client_config(&store, &config, &peer).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "config": rendered })))
}

#[derive(Debug, Deserialize)]
struct QrQuery {
    format: Option<String>,
    size: Option<i64>,
}

async fn client_qr(
    _auth: AuthUser,
    store: web::Data<VpnStore>,
    config: web::Data<Config>,
    path: web::Path<Uuid>,
    query: web::Query<QrQuery>,
) -> Result<HttpResponse, ApiError> {
    // Reject a bad format before loading anything.
    let format: QrFormat = query.format.as_deref().unwrap_or("base64").parse()?;
    let size = match query.size {
        Some(s) if s > 0 => s as u32,
        _ => 256,
    };

    let id = path.into_inner();
    let peer = store.get_peer(id).await?.ok_or(ApiError::ClientNotFound)?;
    let rendered = render_client_config(&store, &config, &peer).await?;

    match wireguard_config_qr(&rendered, format, size)? {
        QrOutput::Png(bytes) => Ok(HttpResponse::Ok()
            .content_type("image/png")
            .insert_header((
                "Content-Disposition",
                format!("inline; filename=\"client-{id}-config.png\""),
            ))
            .body(bytes)),
        QrOutput::Text(data) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "data": data,
            "format": format.as_str(),
        }))),
    }
}
