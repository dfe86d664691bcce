//! Ephemeral flow state for in-flight authorizations
//!
//! Three stages of the authorization-code flow live here, each in its own
//! [`ExpiringMap`] keyed by a random token and sized by its configured TTL:
//! pending authorizations (awaiting the upstream round-trip), authorization
//! codes (awaiting redemption), and refresh tokens. Codes and pendings are
//! consumed with `take`, so redemption is single-use by construction.

use crate::config::OAuthConfig;
use crate::expiring_map::ExpiringMap;
use crate::oauth::registry::generate_url_safe_token;

/// An authorization request parked while the user authenticates upstream,
/// keyed by the correlation token used as the upstream `state`
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Client that initiated the flow
    pub client_id: String,
    /// S256 PKCE challenge the token request must later prove
    pub code_challenge: String,
    /// Validated redirect URI to send the code back to
    pub redirect_uri: String,
    /// Client's own `state`, echoed back untouched
    pub state: Option<String>,
    /// Scopes requested at the authorization endpoint
    pub scope: Option<String>,
}

/// A minted, not-yet-redeemed authorization code
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    /// Client the code was minted for
    pub client_id: String,
    /// PKCE challenge carried over from the pending authorization
    pub code_challenge: String,
    /// Redirect URI the code was delivered to; must match at redemption
    pub redirect_uri: String,
    /// Authenticated upstream subject
    pub subject: String,
    /// Tableau site the subject authenticated against
    pub site_id: Option<String>,
    /// Upstream access token captured during the callback exchange
    pub upstream_token: String,
    /// Scopes to grant on redemption
    pub scope: Option<String>,
}

/// Server-side record backing an issued refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    /// Client the refresh token belongs to
    pub client_id: String,
    /// Subject the original grant authenticated
    pub subject: String,
    /// Granted scopes, re-issued verbatim on refresh
    pub scope: Option<String>,
    /// Tableau site carried across refreshes
    pub site_id: Option<String>,
    /// Upstream access token carried across refreshes
    pub upstream_token: String,
}

/// All ephemeral flow state, grouped for the provider
pub struct FlowStores {
    /// Awaiting the upstream callback, keyed by correlation token
    pub pending: ExpiringMap<String, PendingAuthorization>,
    /// Awaiting redemption at the token endpoint, keyed by code
    pub codes: ExpiringMap<String, AuthorizationCode>,
    /// Live refresh tokens, keyed by token value
    pub refresh_tokens: ExpiringMap<String, RefreshTokenData>,
}

impl FlowStores {
    /// Build the stores from the configured TTLs.
    #[must_use]
    pub fn new(config: &OAuthConfig) -> Self {
        Self {
            pending: ExpiringMap::new(config.pending_authorization_ttl),
            codes: ExpiringMap::new(config.authorization_code_ttl),
            refresh_tokens: ExpiringMap::new(config.refresh_token_ttl),
        }
    }

    /// Park a pending authorization and return its correlation token.
    pub fn park(&self, pending: PendingAuthorization) -> String {
        let correlation = generate_url_safe_token(32);
        self.pending.insert(correlation.clone(), pending);
        correlation
    }

    /// Mint an authorization code for a completed upstream login.
    pub fn mint_code(&self, code: AuthorizationCode) -> String {
        let value = generate_url_safe_token(32);
        self.codes.insert(value.clone(), code);
        value
    }

    /// Mint a refresh token.
    pub fn mint_refresh_token(&self, data: RefreshTokenData) -> String {
        let value = generate_url_safe_token(32);
        self.refresh_tokens.insert(value.clone(), data);
        value
    }
}
