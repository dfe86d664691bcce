//! OAuth 2.1 authorization server for the Tableau MCP server
//!
//! Implements the authorization-code flow with PKCE (RFC 7636), dynamic
//! client registration (RFC 7591), metadata discovery (RFC 8414), and
//! refresh-token and client-credentials grants, bridging MCP clients to an
//! upstream Tableau identity provider.
//!
//! All flow state is in-memory and TTL-bounded; access tokens are
//! self-describing encrypted claim sets and never stored server-side.

pub mod authorize;
pub mod callback;
pub mod dns;
pub mod keys;
pub mod metadata;
pub mod middleware;
pub mod register;
pub mod registry;
pub mod stores;
pub mod token;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::Result;
use crate::config::Config;
use crate::error::oauth_codes;

pub use dns::{PinnedResolver, RedirectResolver, StaticResolver};
pub use keys::{AUDIENCE, Claims, KeyProvider};
pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
pub use middleware::{AuthInfo, auth_middleware};
pub use registry::{ClientRegistry, RegisteredClient};
pub use stores::FlowStores;
pub use upstream::UpstreamExchange;

/// The authorization server: keys, clients, flow state, and the upstream
/// bridge, owned as one unit and shared across request handlers
pub struct OAuthProvider {
    /// Keypair backing token encrypt/decrypt
    pub keys: KeyProvider,
    /// Static and dynamically registered clients
    pub registry: ClientRegistry,
    /// Ephemeral flow state
    pub stores: FlowStores,
    /// Upstream identity provider bridge
    pub upstream: UpstreamExchange,
    /// Redirect target resolver (pinned in production, fake in tests)
    pub resolver: Arc<dyn RedirectResolver>,
    issuer: String,
    server_name: String,
    advertise_api_scopes: bool,
    access_token_lifetime: Duration,
}

impl OAuthProvider {
    /// Build the provider from validated configuration.
    ///
    /// # Errors
    ///
    /// Fails fast on unloadable key material or malformed static client
    /// pairs; the process must not serve without them.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_resolver(config, Arc::new(PinnedResolver::new()))
    }

    /// Build the provider with an injected resolver.
    pub fn with_resolver(config: &Config, resolver: Arc<dyn RedirectResolver>) -> Result<Self> {
        let keys = KeyProvider::from_config(&config.oauth)?;
        let registry = ClientRegistry::new(
            config.oauth.static_clients()?,
            config.oauth.static_client_redirect_uris.clone(),
            config.oauth.client_registration_ttl,
        );
        let stores = FlowStores::new(&config.oauth);
        let upstream = UpstreamExchange::new(config.upstream.clone())?;

        Ok(Self {
            keys,
            registry,
            stores,
            upstream,
            resolver,
            issuer: config.oauth.issuer.trim_end_matches('/').to_string(),
            server_name: config.oauth.server_name.clone(),
            advertise_api_scopes: config.oauth.advertise_api_scopes,
            access_token_lifetime: config.oauth.access_token_lifetime,
        })
    }

    /// Issuer URL this server identifies as.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Server name forming the protected-resource identifier.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Whether discovery documents advertise the full API scope set.
    #[must_use]
    pub fn advertise_api_scopes(&self) -> bool {
        self.advertise_api_scopes
    }

    /// Configured access token lifetime.
    #[must_use]
    pub fn access_token_lifetime(&self) -> Duration {
        self.access_token_lifetime
    }

    /// This server's own callback URL, registered with the upstream provider.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/oauth/callback", self.issuer)
    }
}

/// Routes served by the authorization server (all unauthenticated by design;
/// the protected MCP surface is wired separately behind the middleware).
pub fn router(provider: Arc<OAuthProvider>) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(metadata::authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(metadata::protected_resource_metadata),
        )
        .route("/oauth/authorize", get(authorize::authorize))
        .route("/oauth/callback", get(callback::callback))
        .route("/oauth/register", post(register::register))
        .route("/oauth/token", post(token::token))
        .with_state(provider)
}

/// RFC 6749 error body with the status the error code calls for.
pub(crate) fn oauth_error_response(code: &'static str, description: &str) -> Response {
    let status = if code == oauth_codes::INVALID_CLIENT {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Json(json!({
            "error": code,
            "error_description": description,
        })),
    )
        .into_response()
}
