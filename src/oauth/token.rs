//! Token endpoint: the three supported grant types
//!
//! `authorization_code` redeems a single-use code with PKCE proof,
//! `refresh_token` rotates a server-side refresh record, and
//! `client_credentials` serves machine-to-machine callers. All failures
//! speak the RFC 6749 error vocabulary; client authentication failures are
//! indistinguishable between "unknown client" and "bad secret".

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::oauth_codes;
use crate::oauth::keys::{Claims, expiry_in};
use crate::oauth::registry::{RegisteredClient, secrets_match};
use crate::oauth::stores::RefreshTokenData;
use crate::oauth::{AUDIENCE, OAuthProvider, oauth_error_response};
use crate::{Error, Result};

/// Fixed lifetime of `client_credentials` access tokens, in seconds
const CLIENT_CREDENTIALS_LIFETIME: u64 = 3600;

/// Fixed scope granted to `client_credentials` tokens
const CLIENT_CREDENTIALS_SCOPE: &str = "read";

/// Token request body, accepted as a form or as JSON
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// One of `authorization_code`, `refresh_token`, `client_credentials`
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Authorization code being redeemed
    #[serde(default)]
    pub code: Option<String>,
    /// Redirect URI the code was delivered to
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// PKCE verifier proving possession of the original challenge
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Refresh token being rotated
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Client id, if not sent via Basic auth
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret, if not sent via Basic auth
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Successful token response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Encrypted bearer access token
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Rotating refresh token, absent for `client_credentials`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes
    pub scope: String,
}

/// `POST /oauth/token`
pub async fn token(
    State(provider): State<Arc<OAuthProvider>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request = match parse_body(&headers, &body) {
        Ok(request) => request,
        Err(e) => return error_to_response(&e),
    };

    let client = match authenticate_client(&provider, &headers, &request) {
        Ok(client) => client,
        Err(e) => return error_to_response(&e),
    };

    let result = match request.grant_type.as_deref() {
        Some("authorization_code") => authorization_code_grant(&provider, &client, &request),
        Some("refresh_token") => refresh_token_grant(&provider, &client, &request),
        Some("client_credentials") => client_credentials_grant(&provider, &client),
        Some(other) => {
            debug!(grant_type = %other, "Unsupported grant type requested");
            Err(Error::oauth(
                oauth_codes::UNSUPPORTED_GRANT_TYPE,
                format!("Unsupported grant_type: {other}"),
            ))
        }
        None => Err(Error::oauth(
            oauth_codes::INVALID_REQUEST,
            "grant_type is required",
        )),
    };

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_to_response(&e),
    }
}

/// Accept a urlencoded form or a JSON object, sniffing by content type with
/// a JSON fallback for clients that omit the header.
fn parse_body(headers: &HeaderMap, body: &str) -> Result<TokenRequest> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let parsed = if content_type.starts_with("application/json")
        || (content_type.is_empty() && body.trim_start().starts_with('{'))
    {
        serde_json::from_str(body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_str(body).map_err(|e| e.to_string())
    };

    parsed.map_err(|e| Error::oauth(oauth_codes::INVALID_REQUEST, format!("Malformed body: {e}")))
}

/// Resolve client credentials from Basic auth or the body, then verify them.
fn authenticate_client(
    provider: &OAuthProvider,
    headers: &HeaderMap,
    request: &TokenRequest,
) -> Result<RegisteredClient> {
    let (client_id, client_secret) = if let Some(basic) = basic_credentials(headers) {
        (Some(basic.0), Some(basic.1))
    } else {
        (request.client_id.clone(), request.client_secret.clone())
    };

    let Some(client_id) = client_id else {
        return Err(Error::oauth(
            oauth_codes::INVALID_CLIENT,
            "Client authentication required",
        ));
    };

    provider
        .registry
        .authenticate(&client_id, client_secret.as_deref().filter(|s| !s.is_empty()))
}

/// Decode an `Authorization: Basic` header into `(client_id, client_secret)`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

fn authorization_code_grant(
    provider: &OAuthProvider,
    client: &RegisteredClient,
    request: &TokenRequest,
) -> Result<TokenResponse> {
    let invalid_grant =
        |description: &str| Error::oauth(oauth_codes::INVALID_GRANT, description.to_string());

    let code_value = request
        .code
        .as_deref()
        .ok_or_else(|| Error::oauth(oauth_codes::INVALID_REQUEST, "code is required"))?;
    let verifier = request
        .code_verifier
        .as_deref()
        .ok_or_else(|| Error::oauth(oauth_codes::INVALID_REQUEST, "code_verifier is required"))?;

    // Single use: take() wins or loses atomically against concurrent replays
    let code = provider
        .stores
        .codes
        .take(&code_value.to_string())
        .ok_or_else(|| invalid_grant("Unknown, expired, or already-used code"))?;

    if code.client_id != client.client_id {
        return Err(invalid_grant("Code was issued to a different client"));
    }
    if request.redirect_uri.as_deref() != Some(code.redirect_uri.as_str()) {
        return Err(invalid_grant("redirect_uri mismatch"));
    }
    if !verifier_matches_challenge(verifier, &code.code_challenge) {
        warn!(client_id = %client.client_id, "PKCE verification failed");
        return Err(invalid_grant("PKCE verification failed"));
    }

    let scope = code.scope.unwrap_or_else(|| CLIENT_CREDENTIALS_SCOPE.to_string());
    let access_token = mint_access_token(
        provider,
        &code.subject,
        &scope,
        code.site_id.clone(),
        Some(code.upstream_token.clone()),
        provider.access_token_lifetime().as_secs(),
    )?;
    let refresh_token = provider.stores.mint_refresh_token(RefreshTokenData {
        client_id: client.client_id.clone(),
        subject: code.subject.clone(),
        scope: Some(scope.clone()),
        site_id: code.site_id,
        upstream_token: code.upstream_token,
    });

    info!(client_id = %client.client_id, "Access token issued via authorization_code");

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: provider.access_token_lifetime().as_secs(),
        refresh_token: Some(refresh_token),
        scope,
    })
}

fn refresh_token_grant(
    provider: &OAuthProvider,
    client: &RegisteredClient,
    request: &TokenRequest,
) -> Result<TokenResponse> {
    let value = request
        .refresh_token
        .as_deref()
        .ok_or_else(|| Error::oauth(oauth_codes::INVALID_REQUEST, "refresh_token is required"))?;

    // Rotation: the presented token is consumed whether or not a new one is
    // ultimately issued
    let data = provider
        .stores
        .refresh_tokens
        .take(&value.to_string())
        .ok_or_else(|| {
            Error::oauth(oauth_codes::INVALID_GRANT, "Unknown or expired refresh token")
        })?;

    if data.client_id != client.client_id {
        return Err(Error::oauth(
            oauth_codes::INVALID_GRANT,
            "Refresh token was issued to a different client",
        ));
    }

    let scope = data.scope.clone().unwrap_or_else(|| CLIENT_CREDENTIALS_SCOPE.to_string());
    let access_token = mint_access_token(
        provider,
        &data.subject,
        &scope,
        data.site_id.clone(),
        Some(data.upstream_token.clone()),
        provider.access_token_lifetime().as_secs(),
    )?;
    let rotated = provider.stores.mint_refresh_token(data);

    info!(client_id = %client.client_id, "Access token issued via refresh_token");

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: provider.access_token_lifetime().as_secs(),
        refresh_token: Some(rotated),
        scope,
    })
}

fn client_credentials_grant(
    provider: &OAuthProvider,
    client: &RegisteredClient,
) -> Result<TokenResponse> {
    if !client.is_confidential() {
        return Err(Error::oauth(
            oauth_codes::INVALID_CLIENT,
            "client_credentials requires a confidential client",
        ));
    }

    let access_token = mint_access_token(
        provider,
        &client.client_id,
        CLIENT_CREDENTIALS_SCOPE,
        None,
        None,
        CLIENT_CREDENTIALS_LIFETIME,
    )?;

    info!(client_id = %client.client_id, "Access token issued via client_credentials");

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: CLIENT_CREDENTIALS_LIFETIME,
        refresh_token: None,
        scope: CLIENT_CREDENTIALS_SCOPE.to_string(),
    })
}

fn mint_access_token(
    provider: &OAuthProvider,
    subject: &str,
    scope: &str,
    site_id: Option<String>,
    upstream_token: Option<String>,
    lifetime_secs: u64,
) -> Result<String> {
    provider.keys.encrypt(&Claims {
        iss: provider.issuer().to_string(),
        aud: AUDIENCE.to_string(),
        sub: subject.to_string(),
        scope: scope.to_string(),
        exp: expiry_in(std::time::Duration::from_secs(lifetime_secs)),
        site_id,
        target_url: provider.upstream.target_url().map(String::from),
        upstream_token,
    })
}

/// Constant-time S256 check: hash the verifier, encode, and compare digests.
fn verifier_matches_challenge(verifier: &str, challenge: &str) -> bool {
    let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    secrets_match(&computed, challenge)
}

fn error_to_response(error: &Error) -> Response {
    oauth_error_response(error.oauth_code(), &error.to_string())
}
