//! Tableau MCP Server Library
//!
//! Model Context Protocol (MCP) server fronting Tableau, with a built-in
//! OAuth 2.1 authorization server provider.
//!
//! # Features
//!
//! - **Authorization-code flow with PKCE** (S256 only), bridging MCP
//!   clients to an upstream Tableau identity provider
//! - **Dynamic client registration** (RFC 7591), in-memory and TTL-bounded
//! - **Metadata discovery** (RFC 8414 + protected-resource metadata)
//! - **Encrypted stateless access tokens**: RSA-OAEP-wrapped AES-256-GCM
//!   claim sets, validated without server-side storage
//! - **DNS-pinned redirect validation** closing SSRF and open-redirect
//!   vectors
//! - **Production ready**: structured logging, health checks, graceful
//!   shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod expiring_map;
pub mod oauth;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP protocol version supported by this server
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
