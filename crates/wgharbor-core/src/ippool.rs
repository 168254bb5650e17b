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

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::RwLock;

use ipnetwork::{IpNetwork, Ipv4Network};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("IPv6 networks are not supported")]
    Ipv6Unsupported,

    #[error("network too small, need at least /29")]
    NetworkTooSmall,

    #[error("no available IP addresses in pool")]
    Exhausted,

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("IP address not in network range: {0}")]
    OutOfRange(Ipv4Addr),

    #[error("cannot allocate network address: {0}")]
    NetworkAddress(Ipv4Addr),

    #[error("cannot allocate broadcast address: {0}")]
    BroadcastAddress(Ipv4Addr),

    #[error("IP address reserved for server: {0}")]
    ServerReserved(Ipv4Addr),

    #[error("IP address already allocated: {0}")]
    AlreadyAllocated(Ipv4Addr),

    #[error("IP address not allocated: {0}")]
    NotAllocated(Ipv4Addr),
}

type Result<T> = std::result::Result<T, PoolError>;

/// Summary of the pool's network topology.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub network: String,
    pub server_ip: Ipv4Addr,
    pub network_address: Ipv4Addr,
    pub broadcast_address: Ipv4Addr,
    pub total_hosts: u32,
}

/// IPv4 address pool for peer allocation.
///
/// The network, broadcast, and server addresses are reserved at
/// construction and can never be handed out. All mutating operations go
/// through an internal lock; concurrent allocations are guaranteed to
/// return distinct addresses. The network topology fields are immutable
/// after construction and read lock-free.
#[derive(Debug)]
pub struct IpPool {
    network: Ipv4Network,
    server_ip: Ipv4Addr,
    network_address: Ipv4Addr,
    broadcast_address: Ipv4Addr,
    total_hosts: u32,
    allocated: RwLock<HashSet<Ipv4Addr>>,
}

impl IpPool {
    /// Build a pool from an IPv4 CIDR. Rejects IPv6 input and anything
    /// narrower than /29.
    pub fn new(cidr: &str) -> Result<Self> {
        let network = match cidr.parse::<IpNetwork>() {
            Ok(IpNetwork::V4(v4)) => v4,
            Ok(IpNetwork::V6(_)) => return Err(PoolError::Ipv6Unsupported),
            Err(_) => return Err(PoolError::InvalidCidr(cidr.to_string())),
        };

        if network.prefix() > 29 {
            return Err(PoolError::NetworkTooSmall);
        }

        let network_address = network.network();
        let broadcast_address = network.broadcast();
        let server_ip = Ipv4Addr::from(u32::from(network_address) + 1);
        let total_hosts = ((1u64 << (32 - network.prefix())) - 2) as u32;

        let mut allocated = HashSet::new();
        allocated.insert(network_address);
        allocated.insert(broadcast_address);
        allocated.insert(server_ip);

        Ok(Self {
            network,
            server_ip,
            network_address,
            broadcast_address,
            total_hosts,
            allocated: RwLock::new(allocated),
        })
    }

    /// Allocate the next free address, scanning upward from the first
    /// usable client slot.
    pub fn allocate(&self) -> Result<Ipv4Addr> {
        let mut allocated = self.allocated.write().unwrap();

        let first = u32::from(self.network_address) + 2;
        let last = u32::from(self.broadcast_address) - 1;

        for raw in first..=last {
            let candidate = Ipv4Addr::from(raw);
            if !allocated.contains(&candidate) {
                allocated.insert(candidate);
                return Ok(candidate);
            }
        }

        Err(PoolError::Exhausted)
    }

    /// Allocate one specific address, distinguishing every refusal.
    pub fn allocate_specific(&self, ip: &str) -> Result<Ipv4Addr> {
        let addr: Ipv4Addr = ip
            .parse()
            .map_err(|_| PoolError::InvalidAddress(ip.to_string()))?;

        if !self.network.contains(addr) {
            return Err(PoolError::OutOfRange(addr));
        }
        if addr == self.network_address {
            return Err(PoolError::NetworkAddress(addr));
        }
        if addr == self.broadcast_address {
            return Err(PoolError::BroadcastAddress(addr));
        }
        if addr == self.server_ip {
            return Err(PoolError::ServerReserved(addr));
        }

        let mut allocated = self.allocated.write().unwrap();
        if allocated.contains(&addr) {
            return Err(PoolError::AlreadyAllocated(addr));
        }
        allocated.insert(addr);
        Ok(addr)
    }

    /// Return a previously allocated address to the pool. The server
    /// address is permanently reserved and cannot be released.
    pub fn release(&self, ip: &str) -> Result<()> {
        let addr: Ipv4Addr = ip
            .parse()
            .map_err(|_| PoolError::InvalidAddress(ip.to_string()))?;

        if !self.network.contains(addr) {
            return Err(PoolError::OutOfRange(addr));
        }
        if addr == self.server_ip {
            return Err(PoolError::ServerReserved(addr));
        }

        let mut allocated = self.allocated.write().unwrap();
        if !allocated.remove(&addr) {
            return Err(PoolError::NotAllocated(addr));
        }
        Ok(())
    }

    pub fn is_allocated(&self, ip: Ipv4Addr) -> bool {
        self.allocated.read().unwrap().contains(&ip)
    }

    pub fn server_ip(&self) -> Ipv4Addr {
        self.server_ip
    }

    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// Addresses currently assigned to peers, sorted ascending. The
    /// structural reservations (network, broadcast, server) are excluded.
    pub fn allocated_list(&self) -> Vec<Ipv4Addr> {
        let allocated = self.allocated.read().unwrap();
        let mut ips: Vec<Ipv4Addr> = allocated
            .iter()
            .copied()
            .filter(|ip| {
                *ip != self.server_ip
                    && *ip != self.network_address
                    && *ip != self.broadcast_address
            })
            .collect();
        ips.sort();
        ips
    }

    /// Number of peer addresses currently assigned.
    pub fn allocated_count(&self) -> u32 {
        (self.allocated.read().unwrap().len() - 3) as u32
    }

    /// Addresses still available to peers. The server slot counts as
    /// permanently taken.
    pub fn available_count(&self) -> u32 {
        self.total_hosts - 1 - self.allocated_count()
    }

    pub fn total_hosts(&self) -> u32 {
        self.total_hosts
    }

    pub fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            network: self.network.to_string(),
            server_ip: self.server_ip,
            network_address: self.network_address,
            broadcast_address: self.broadcast_address,
            total_hosts: self.total_hosts,
        }
    }
}
