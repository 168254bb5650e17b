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

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Model types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Peer {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub address: String,
    pub enabled: bool,
    pub bytes_received: i64,
    pub bytes_sent: i64,
    pub last_handshake: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Singleton server configuration row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerConfigRow {
    pub id: i64,
    pub private_key: String,
    pub public_key: String,
    pub listen_port: i64,
    pub network: String,
    pub interface: String,
    /// Comma-joined DNS list.
    pub dns: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerConfigRow {
    pub fn dns_list(&self) -> Vec<String> {
        self.dns
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// One audit-log row joined with the peer's name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectionLogEntry {
    pub id: i64,
    pub peer_id: Uuid,
    pub peer_name: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub remote_address: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VpnStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("client name already taken")]
    DuplicateName,

    #[error("public key already registered")]
    DuplicatePublicKey,

    #[error("address already assigned")]
    DuplicateAddress,

    #[error("peer not found")]
    PeerNotFound,

    #[error("server configuration missing")]
    ServerConfigMissing,
}

type Result<T> = std::result::Result<T, VpnStoreError>;

fn map_unique_violation(e: sqlx::Error) -> VpnStoreError {
    if let sqlx::Error::Database(db_err) = &e {
        let message = db_err.message();
        if message.contains("peers.name") {
            return VpnStoreError::DuplicateName;
        }
        if message.contains("peers.public_key") {
            return VpnStoreError::DuplicatePublicKey;
        }
        if message.contains("peers.address") {
            return VpnStoreError::DuplicateAddress;
        }
    }
    VpnStoreError::Database(e)
}

// ---------------------------------------------------------------------------
// VpnStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VpnStore {
    pool: SqlitePool,
}

impl VpnStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -- Peer CRUD -----------------------------------------------------------

    #[tracing::instrument(skip(self, private_key))]
    pub async fn create_peer(
        &self,
        name: &str,
        public_key: &str,
        private_key: &str,
        address: &str,
    ) -> Result<Peer> {
        let now = Utc::now();
        sqlx::query_as::<_, Peer>(
            "INSERT INTO peers (id, name, public_key, private_key, address, enabled, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 1, $6, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(public_key)
        .bind(private_key)
        .bind(address)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_peer(&self, id: Uuid) -> Result<Option<Peer>> {
        sqlx::query_as::<_, Peer>("SELECT * FROM peers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_peer_by_public_key(&self, public_key: &str) -> Result<Option<Peer>> {
        sqlx::query_as::<_, Peer>("SELECT * FROM peers WHERE public_key = $1")
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_peers(&self) -> Result<Vec<Peer>> {
        sqlx::query_as::<_, Peer>("SELECT * FROM peers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Partial update; absent fields keep their value. Returns the
    /// updated row.
    #[tracing::instrument(skip(self))]
    pub async fn update_peer(
        &self,
        id: Uuid,
        name: Option<&str>,
        enabled: Option<bool>,
    ) -> Result<Peer> {
        sqlx::query_as::<_, Peer>(
            "UPDATE peers
             SET name = COALESCE($1, name),
                 enabled = COALESCE($2, enabled),
                 updated_at = $3
             WHERE id = $4
             RETURNING *",
        )
        .bind(name)
        .bind(enabled)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)?
        .ok_or(VpnStoreError::PeerNotFound)
    }

    /// Called by the runtime-state reconciliation to push handshake and
    /// counter samples into the row.
    #[tracing::instrument(skip(self))]
    pub async fn update_peer_runtime(
        &self,
        id: Uuid,
        bytes_received: i64,
        bytes_sent: i64,
        last_handshake: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE peers
             SET bytes_received = $1, bytes_sent = $2, last_handshake = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(bytes_received)
        .bind(bytes_sent)
        .bind(last_handshake)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_peer(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM peers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Server config -------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn get_server_config(&self) -> Result<Option<ServerConfigRow>> {
        sqlx::query_as::<_, ServerConfigRow>("SELECT * FROM server_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Insert or replace the singleton row.
    #[tracing::instrument(skip(self, private_key))]
    pub async fn replace_server_config(
        &self,
        private_key: &str,
        public_key: &str,
        listen_port: u16,
        network: &str,
        interface: &str,
        dns: &[String],
    ) -> Result<ServerConfigRow> {
        let now = Utc::now();
        sqlx::query_as::<_, ServerConfigRow>(
            "INSERT INTO server_config (id, private_key, public_key, listen_port, network, interface, dns, created_at, updated_at)
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $7)
             ON CONFLICT (id) DO UPDATE SET
                 private_key = excluded.private_key,
                 public_key = excluded.public_key,
                 listen_port = excluded.listen_port,
                 network = excluded.network,
                 interface = excluded.interface,
                 dns = excluded.dns,
                 updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(private_key)
        .bind(public_key)
        .bind(listen_port as i64)
        .bind(network)
        .bind(interface)
        .bind(dns.join(","))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Partial update of the mutable settings.
    #[tracing::instrument(skip(self))]
    pub async fn update_server_config(
        &self,
        listen_port: Option<u16>,
        dns: Option<&[String]>,
    ) -> Result<ServerConfigRow> {
        sqlx::query_as::<_, ServerConfigRow>(
            "UPDATE server_config
             SET listen_port = COALESCE($1, listen_port),
                 dns = COALESCE($2, dns),
                 updated_at = $3
             WHERE id = 1
             RETURNING *",
        )
        .bind(listen_port.map(|p| p as i64))
        .bind(dns.map(|d| d.join(",")))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(VpnStoreError::ServerConfigMissing)
    }

    // -- Connection audit log ------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn log_connection(
        &self,
        peer_id: Uuid,
        action: &str,
        remote_address: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO connection_logs (peer_id, action, timestamp, remote_address)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(peer_id)
        .bind(action)
        .bind(Utc::now())
        .bind(remote_address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent entries first, joined with the peer's name.
    #[tracing::instrument(skip(self))]
    pub async fn list_connection_logs(&self, limit: i64) -> Result<Vec<ConnectionLogEntry>> {
        sqlx::query_as::<_, ConnectionLogEntry>(
            "SELECT l.id, l.peer_id, p.name AS peer_name, l.action, l.timestamp, l.remote_address
             FROM connection_logs l
             JOIN peers p ON p.id = l.peer_id
             ORDER BY l.timestamp DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn count_connections_since(
        &self,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM connection_logs WHERE action = $1 AND timestamp > $2",
        )
        .bind(action)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
