//! Bearer-token enforcement for protected routes
//!
//! The single validation point: extracts the bearer token, decrypts and
//! validates it, and attaches [`AuthInfo`] to the request extensions for
//! tool handlers to read. Handlers behind this middleware never re-validate
//! tokens themselves.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;

use crate::oauth::OAuthProvider;
use crate::oauth::keys::Claims;

/// Authenticated request context available to tool handlers
#[derive(Debug, Clone)]
pub struct AuthInfo {
    /// Authenticated subject
    pub subject: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Tableau site the subject authenticated against
    pub site_id: Option<String>,
    /// Target Tableau server URL
    pub target_url: Option<String>,
    /// Upstream access token for Tableau API calls
    pub upstream_token: Option<String>,
}

impl From<Claims> for AuthInfo {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            scopes: claims.scopes(),
            site_id: claims.site_id.clone(),
            target_url: claims.target_url.clone(),
            upstream_token: claims.upstream_token,
        }
    }
}

/// Authentication middleware for protected routes
pub async fn auth_middleware(
    State(provider): State<Arc<OAuthProvider>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized_response(provider.issuer(), "Missing bearer token");
    };

    let claims = match provider.keys.decrypt(token).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Rejected bearer token");
            return unauthorized_response(provider.issuer(), "Invalid or expired token");
        }
    };

    request.extensions_mut().insert(AuthInfo::from(claims));
    next.run(request).await
}

/// `401` with the `WWW-Authenticate` challenge pointing clients at the
/// protected-resource discovery document.
pub fn unauthorized_response(issuer: &str, description: &str) -> Response {
    let challenge = format!(
        "Bearer realm=\"MCP\", resource_metadata=\"{issuer}/.well-known/oauth-protected-resource\""
    );
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        axum::Json(json!({
            "error": "unauthorized",
            "error_description": description,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::keys::{AUDIENCE, unix_now};

    #[test]
    fn auth_info_from_claims_splits_scopes() {
        let info = AuthInfo::from(Claims {
            iss: "https://mcp.example.com".to_string(),
            aud: AUDIENCE.to_string(),
            sub: "user-1".to_string(),
            scope: "read write".to_string(),
            exp: unix_now() + 60,
            site_id: Some("finance".to_string()),
            target_url: Some("https://tableau.example.com".to_string()),
            upstream_token: Some("upstream".to_string()),
        });
        assert_eq!(info.subject, "user-1");
        assert_eq!(info.scopes, vec!["read", "write"]);
        assert_eq!(info.site_id.as_deref(), Some("finance"));
    }

    #[test]
    fn unauthorized_response_carries_challenge() {
        let response = unauthorized_response("https://mcp.example.com", "nope");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.starts_with("Bearer realm=\"MCP\""));
        assert!(challenge.contains(
            "resource_metadata=\"https://mcp.example.com/.well-known/oauth-protected-resource\""
        ));
    }
}
