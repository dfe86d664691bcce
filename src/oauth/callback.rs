//! Upstream callback endpoint
//!
//! Receives the upstream identity provider's redirect, consumes the pending
//! authorization exactly once, performs the back-channel code exchange, and
//! sends the user agent back to the original client with a freshly minted
//! single-use authorization code.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::oauth_codes;
use crate::oauth::authorize::{error_redirect, found};
use crate::oauth::stores::AuthorizationCode;
use crate::oauth::{OAuthProvider, oauth_error_response};

/// Query parameters delivered by the upstream provider
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Upstream authorization code on success
    #[serde(default)]
    pub code: Option<String>,
    /// Correlation token this server issued as the upstream `state`
    #[serde(default)]
    pub state: Option<String>,
    /// Upstream error code on failure
    #[serde(default)]
    pub error: Option<String>,
    /// Upstream error description on failure
    #[serde(default)]
    pub error_description: Option<String>,
}

/// `GET /oauth/callback`
pub async fn callback(
    State(provider): State<Arc<OAuthProvider>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Consume the pending authorization exactly once. A missing entry is
    // terminal: there is no client redirect URI to reflect onto.
    let pending = params
        .state
        .as_ref()
        .and_then(|correlation| provider.stores.pending.take(correlation));
    let Some(pending) = pending else {
        warn!("Callback with unknown or already-consumed state");
        return oauth_error_response(
            oauth_codes::ACCESS_DENIED,
            "Unknown or expired authorization request",
        );
    };

    if let Some(error) = params.error {
        // The user declined or upstream failed; reflect it to the client
        debug!(%error, client_id = %pending.client_id, "Upstream reported an authorization error");
        let description = params
            .error_description
            .unwrap_or_else(|| "Upstream authorization failed".to_string());
        return error_redirect(
            &pending.redirect_uri,
            leak_free_error(&error),
            &description,
            pending.state.as_deref(),
        );
    }

    let Some(upstream_code) = params.code else {
        return error_redirect(
            &pending.redirect_uri,
            oauth_codes::INVALID_REQUEST,
            "Callback missing authorization code",
            pending.state.as_deref(),
        );
    };

    let identity = match provider
        .upstream
        .exchange_code(&upstream_code, &provider.callback_url())
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, client_id = %pending.client_id, "Upstream code exchange failed");
            return error_redirect(
                &pending.redirect_uri,
                e.oauth_code(),
                "Upstream token exchange failed",
                pending.state.as_deref(),
            );
        }
    };

    let code = provider.stores.mint_code(AuthorizationCode {
        client_id: pending.client_id.clone(),
        code_challenge: pending.code_challenge,
        redirect_uri: pending.redirect_uri.clone(),
        subject: identity.subject,
        site_id: identity.site_id,
        upstream_token: identity.access_token,
        scope: pending.scope,
    });

    info!(client_id = %pending.client_id, "Authorization code issued");

    match Url::parse(&pending.redirect_uri) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("code", &code);
                if let Some(ref state) = pending.state {
                    pairs.append_pair("state", state);
                }
            }
            found(url.as_str())
        }
        Err(_) => oauth_error_response(oauth_codes::SERVER_ERROR, "Stored redirect_uri invalid"),
    }
}

/// Map an arbitrary upstream error string onto our RFC 6749 vocabulary so
/// that nothing upstream-specific leaks to the client.
fn leak_free_error(upstream_error: &str) -> &'static str {
    match upstream_error {
        "access_denied" => oauth_codes::ACCESS_DENIED,
        "invalid_request" => oauth_codes::INVALID_REQUEST,
        _ => oauth_codes::SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_map_to_known_vocabulary() {
        assert_eq!(leak_free_error("access_denied"), "access_denied");
        assert_eq!(leak_free_error("invalid_request"), "invalid_request");
        assert_eq!(leak_free_error("temporarily_unavailable"), "server_error");
        assert_eq!(leak_free_error("vendor_specific_code"), "server_error");
    }

    #[test]
    fn callback_params_parse_success_shape() {
        let params: CallbackParams =
            serde_urlencoded::from_str("code=abc&state=xyz").unwrap();
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert!(params.error.is_none());
    }

    #[test]
    fn callback_params_parse_error_shape() {
        let params: CallbackParams =
            serde_urlencoded::from_str("error=access_denied&error_description=nope&state=xyz")
                .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("nope"));
    }
}
