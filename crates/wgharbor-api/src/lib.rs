//! wgharbor-api: authenticated admin API, persistence, and monitoring for
//! the wgharbor VPN server.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod monitor;
pub mod routes;
