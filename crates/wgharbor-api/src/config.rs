use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::auth;

/// Runtime configuration, entirely environment-driven.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    /// WireGuard config directory; `<dir>/<interface>.conf` is the file
    /// the driver owns.
    pub wg_config_dir: PathBuf,
    pub wg_interface: String,
    /// UDP port WireGuard listens on.
    pub listen_port: u16,
    /// VPN network in CIDR notation; also seeds the IP pool.
    pub vpn_network: String,
    /// Uplink interface for NAT.
    pub external_interface: String,
    /// Public host clients connect to, rendered into client configs.
    pub endpoint_host: String,
    /// DNS servers handed to clients.
    pub dns_servers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            let secret = auth::generate_secret();
            warn!("JWT_SECRET not set, generated an ephemeral signing secret");
            secret
        });

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://wgharbor.db".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            jwt_secret,
            wg_config_dir: env::var("WG_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/usr/local/etc/wireguard")),
            wg_interface: env::var("WG_INTERFACE").unwrap_or_else(|_| "wg0".to_string()),
            listen_port: env::var("WG_LISTEN_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(51820),
            vpn_network: env::var("VPN_NETWORK").unwrap_or_else(|_| "10.0.0.0/24".to_string()),
            external_interface: env::var("EXTERNAL_INTERFACE")
                .unwrap_or_else(|_| "en0".to_string()),
            endpoint_host: env::var("ENDPOINT_HOST").unwrap_or_else(|_| "localhost".to_string()),
            dns_servers: env::var("DNS_SERVERS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]),
        }
    }
}
