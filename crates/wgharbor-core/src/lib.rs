//! wgharbor-core: host-side control for a single-node WireGuard VPN server.
//!
//! This crate owns everything that touches the host: the IPv4 address pool,
//! Curve25519 key generation, the WireGuard config file format (render and
//! parse), the `wg`/`wg-quick` driver, the pfctl packet-filter driver, and
//! the QR encoder used to hand configs to mobile clients.

pub mod config;
pub mod firewall;
pub mod ippool;
pub mod keys;
pub mod qr;
pub mod wg;

pub use config::{ClientConfig, ConfigFile, PeerStanza, ServerConfig};
pub use firewall::{FirewallError, FirewallStatus, PfctlManager, VpnRuleConfig};
pub use ippool::{IpPool, NetworkInfo, PoolError};
pub use keys::{generate_keypair, public_key_from_private, KeyError, KeyPair};
pub use qr::{QrError, QrFormat, QrGenerator, QrOutput};
pub use wg::{InterfaceState, InterfaceStatus, RuntimePeer, WgError, WgServer};
