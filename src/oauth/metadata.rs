//! Discovery documents (RFC 8414 and OAuth protected-resource metadata)
//!
//! Both documents are pure functions of configuration; they are built per
//! request from the provider state and never fail once the server is up.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::oauth::OAuthProvider;

/// Tableau API scopes advertised when `advertise_api_scopes` is set
pub const API_SCOPES: &[&str] = &[
    "tableau:content:read",
    "tableau:viz_data_service:read",
    "tableau:insights:read",
    "tableau:insight_definitions_metrics:read",
    "tableau:insight_metrics:read",
];

/// Scopes advertised otherwise
pub const MINIMAL_SCOPES: &[&str] = &["read"];

/// RFC 8414 authorization server metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer URL
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Dynamic client registration endpoint
    pub registration_endpoint: String,
    /// Supported response types
    pub response_types_supported: Vec<String>,
    /// Supported grant types
    pub grant_types_supported: Vec<String>,
    /// Supported PKCE challenge methods
    pub code_challenge_methods_supported: Vec<String>,
    /// Supported token endpoint auth methods
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// Supported subject types
    pub subject_types_supported: Vec<String>,
    /// Supported scopes
    pub scopes_supported: Vec<String>,
}

/// OAuth protected resource metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,
    /// Authorization servers fronting this resource
    pub authorization_servers: Vec<String>,
    /// How bearer tokens may be presented
    pub bearer_methods_supported: Vec<String>,
    /// Supported scopes
    pub scopes_supported: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl AuthorizationServerMetadata {
    /// Build the document for the given issuer.
    #[must_use]
    pub fn for_issuer(issuer: &str, advertise_api_scopes: bool) -> Self {
        Self {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{issuer}/oauth/authorize"),
            token_endpoint: format!("{issuer}/oauth/token"),
            registration_endpoint: format!("{issuer}/oauth/register"),
            response_types_supported: owned(&["code"]),
            grant_types_supported: owned(&[
                "authorization_code",
                "refresh_token",
                "client_credentials",
            ]),
            code_challenge_methods_supported: owned(&["S256"]),
            token_endpoint_auth_methods_supported: owned(&["client_secret_basic"]),
            subject_types_supported: owned(&["public"]),
            scopes_supported: advertised_scopes(advertise_api_scopes),
        }
    }
}

impl ProtectedResourceMetadata {
    /// Build the document for the given issuer and server name.
    #[must_use]
    pub fn for_issuer(issuer: &str, server_name: &str, advertise_api_scopes: bool) -> Self {
        Self {
            resource: format!("{issuer}/{server_name}"),
            authorization_servers: vec![issuer.to_string()],
            bearer_methods_supported: owned(&["header"]),
            scopes_supported: advertised_scopes(advertise_api_scopes),
        }
    }
}

fn advertised_scopes(advertise_api_scopes: bool) -> Vec<String> {
    if advertise_api_scopes {
        owned(API_SCOPES)
    } else {
        owned(MINIMAL_SCOPES)
    }
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn authorization_server_metadata(
    State(provider): State<Arc<OAuthProvider>>,
) -> Json<AuthorizationServerMetadata> {
    Json(AuthorizationServerMetadata::for_issuer(
        provider.issuer(),
        provider.advertise_api_scopes(),
    ))
}

/// `GET /.well-known/oauth-protected-resource`
pub async fn protected_resource_metadata(
    State(provider): State<Arc<OAuthProvider>>,
) -> Json<ProtectedResourceMetadata> {
    Json(ProtectedResourceMetadata::for_issuer(
        provider.issuer(),
        provider.server_name(),
        provider.advertise_api_scopes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_server_document_shape() {
        let meta = AuthorizationServerMetadata::for_issuer("https://mcp.example.com", false);

        assert_eq!(meta.issuer, "https://mcp.example.com");
        assert_eq!(
            meta.authorization_endpoint,
            "https://mcp.example.com/oauth/authorize"
        );
        assert_eq!(meta.token_endpoint, "https://mcp.example.com/oauth/token");
        assert_eq!(
            meta.registration_endpoint,
            "https://mcp.example.com/oauth/register"
        );
        assert_eq!(meta.response_types_supported, vec!["code"]);
        assert_eq!(meta.code_challenge_methods_supported, vec!["S256"]);
        assert_eq!(
            meta.grant_types_supported,
            vec!["authorization_code", "refresh_token", "client_credentials"]
        );
        assert_eq!(
            meta.token_endpoint_auth_methods_supported,
            vec!["client_secret_basic"]
        );
        assert_eq!(meta.subject_types_supported, vec!["public"]);
        assert_eq!(meta.scopes_supported, vec!["read"]);
    }

    #[test]
    fn protected_resource_document_shape() {
        let meta =
            ProtectedResourceMetadata::for_issuer("https://mcp.example.com", "tableau-mcp", false);

        assert_eq!(meta.resource, "https://mcp.example.com/tableau-mcp");
        assert_eq!(meta.authorization_servers, vec!["https://mcp.example.com"]);
        assert_eq!(meta.bearer_methods_supported, vec!["header"]);
        assert_eq!(meta.scopes_supported, vec!["read"]);
    }

    #[test]
    fn api_scopes_advertised_when_enabled() {
        let meta = AuthorizationServerMetadata::for_issuer("https://mcp.example.com", true);
        assert!(meta.scopes_supported.len() > 1);
        assert!(
            meta.scopes_supported
                .iter()
                .all(|s| s.starts_with("tableau:"))
        );
    }

    #[test]
    fn document_serializes_to_stable_json() {
        let meta = AuthorizationServerMetadata::for_issuer("https://mcp.example.com", false);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["code_challenge_methods_supported"][0], "S256");
        assert_eq!(json["scopes_supported"][0], "read");
    }
}
