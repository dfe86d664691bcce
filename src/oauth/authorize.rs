//! Authorization endpoint
//!
//! Parks the client's PKCE challenge and state under a server-side
//! correlation token, then bounces the user agent to the upstream identity
//! provider. The client's own `state` never travels upstream; it is stored
//! in the pending record and restored at the callback.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::oauth_codes;
use crate::oauth::dns::validate_redirect_target;
use crate::oauth::stores::PendingAuthorization;
use crate::oauth::{OAuthProvider, oauth_error_response};

/// Query parameters of `GET /oauth/authorize`
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    /// Requesting client
    pub client_id: String,
    /// Where to deliver the code
    pub redirect_uri: String,
    /// S256 PKCE challenge
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// PKCE method; only `S256` is accepted
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    /// Client state, echoed back on the final redirect
    #[serde(default)]
    pub state: Option<String>,
    /// Requested scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// `GET /oauth/authorize`
pub async fn authorize(
    State(provider): State<Arc<OAuthProvider>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    // Until the redirect URI is validated, errors must not redirect
    let Some(client) = provider.registry.lookup(&params.client_id) else {
        warn!(client_id = %params.client_id, "Authorization request from unknown client");
        return oauth_error_response(oauth_codes::INVALID_CLIENT, "Unknown client");
    };

    if !client.allows_redirect_uri(&params.redirect_uri) {
        warn!(client_id = %params.client_id, "Redirect URI not registered for client");
        return oauth_error_response(oauth_codes::INVALID_REQUEST, "Unregistered redirect_uri");
    }

    if let Err(e) = validate_redirect_target(provider.resolver.as_ref(), &params.redirect_uri).await
    {
        warn!(client_id = %params.client_id, error = %e, "Redirect URI failed validation");
        return oauth_error_response(oauth_codes::INVALID_REQUEST, "Disallowed redirect_uri");
    }

    // The redirect URI is trustworthy from here on; protocol errors are
    // reflected onto it per RFC 6749
    if params.code_challenge_method.as_deref() != Some("S256") {
        return error_redirect(
            &params.redirect_uri,
            oauth_codes::INVALID_REQUEST,
            "code_challenge_method must be S256",
            params.state.as_deref(),
        );
    }
    let Some(code_challenge) = params.code_challenge.filter(|c| !c.is_empty()) else {
        return error_redirect(
            &params.redirect_uri,
            oauth_codes::INVALID_REQUEST,
            "code_challenge is required",
            params.state.as_deref(),
        );
    };

    let correlation = provider.stores.park(PendingAuthorization {
        client_id: client.client_id.clone(),
        code_challenge,
        redirect_uri: params.redirect_uri.clone(),
        state: params.state.clone(),
        scope: params.scope.clone(),
    });

    let upstream = match build_upstream_redirect(&provider, &correlation) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "Cannot build upstream authorization URL");
            return error_redirect(
                &params.redirect_uri,
                oauth_codes::SERVER_ERROR,
                "Upstream provider misconfigured",
                params.state.as_deref(),
            );
        }
    };

    debug!(client_id = %client.client_id, "Redirecting to upstream identity provider");
    found(upstream.as_str())
}

/// Upstream authorization URL carrying the correlation token as `state`.
fn build_upstream_redirect(provider: &OAuthProvider, correlation: &str) -> crate::Result<Url> {
    let mut url = Url::parse(provider.upstream.authorization_endpoint())
        .map_err(|e| crate::Error::Internal(format!("Bad upstream authorization endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", provider.upstream.client_id())
        .append_pair("redirect_uri", &provider.callback_url())
        .append_pair("state", correlation);
    Ok(url)
}

/// `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// `302 Found` back to the client with an RFC 6749 error reflected as query
/// parameters.
pub fn error_redirect(
    redirect_uri: &str,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> Response {
    match Url::parse(redirect_uri) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("error", error);
                pairs.append_pair("error_description", description);
                if let Some(state) = state {
                    pairs.append_pair("state", state);
                }
            }
            found(url.as_str())
        }
        // The URI already passed validation; a parse failure here means it
        // was consumed or corrupted, so answer terminally instead
        Err(_) => oauth_error_response(oauth_codes::INVALID_REQUEST, "Invalid redirect_uri"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_redirect_carries_error_and_state() {
        let response = error_redirect(
            "https://app.example.com/cb",
            "invalid_request",
            "bad things",
            Some("xyz"),
        );
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        let url = Url::parse(location).unwrap();
        let pairs: Vec<_> = url.query_pairs().collect();
        assert!(pairs.iter().any(|(k, v)| k == "error" && v == "invalid_request"));
        assert!(pairs.iter().any(|(k, v)| k == "state" && v == "xyz"));
    }

    #[test]
    fn error_redirect_omits_absent_state() {
        let response = error_redirect("https://app.example.com/cb", "invalid_request", "x", None);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(!location.contains("state="));
    }

    #[test]
    fn found_sets_location() {
        let response = found("https://idp.example.com/authorize");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://idp.example.com/authorize"
        );
    }
}
