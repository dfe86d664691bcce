//! Token exchange against the upstream identity provider
//!
//! The callback handler hands the upstream authorization code to this
//! client, which redeems it at the configured token endpoint. The exchange
//! is bounded by the configured timeout and a failure is fatal only to the
//! single request in flight.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Identity resolved from a successful upstream exchange
#[derive(Debug, Clone)]
pub struct UpstreamIdentity {
    /// Authenticated subject
    pub subject: String,
    /// Tableau site the subject authenticated against, if reported
    pub site_id: Option<String>,
    /// Upstream access token for tool handlers to reuse
    pub access_token: String,
}

/// Wire shape of the upstream token response. Only the fields we carry
/// forward are modeled; everything else is ignored.
#[derive(Debug, Deserialize)]
struct UpstreamTokenResponse {
    access_token: String,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    site_id: Option<String>,
}

/// Client for redeeming authorization codes with the upstream provider
pub struct UpstreamExchange {
    http: Client,
    config: UpstreamConfig,
}

impl UpstreamExchange {
    /// Build the exchange client from upstream configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// The configured upstream authorization endpoint.
    #[must_use]
    pub fn authorization_endpoint(&self) -> &str {
        &self.config.authorization_endpoint
    }

    /// The client id this server presents upstream.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Tableau site to request, if pinned by configuration.
    #[must_use]
    pub fn site_id(&self) -> Option<&str> {
        self.config.site_id.as_deref()
    }

    /// Target Tableau server URL handed to tool handlers.
    #[must_use]
    pub fn target_url(&self) -> Option<&str> {
        self.config.target_url.as_deref()
    }

    /// Redeem an upstream authorization code for the user's identity.
    ///
    /// `redirect_uri` must be this server's own callback URL, exactly as
    /// sent in the authorize redirect.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<UpstreamIdentity> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.config.client_id),
        ];
        if let Some(ref secret) = self.config.client_secret {
            form.push(("client_secret", secret));
        }

        debug!(endpoint = %self.config.token_endpoint, "Exchanging upstream authorization code");

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Token exchange request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            // The upstream judged the exchange itself invalid
            warn!(%status, "Upstream token endpoint rejected the exchange");
            return Err(Error::UpstreamDenied(format!(
                "Upstream token endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            warn!(%status, "Upstream token endpoint failed");
            return Err(Error::Upstream(format!(
                "Upstream token endpoint returned {status}"
            )));
        }

        let body: UpstreamTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Malformed upstream token response: {e}")))?;

        let subject = body
            .sub
            .or(body.user_id)
            .unwrap_or_else(|| "tableau-user".to_string());
        let site_id = body.site_id.or_else(|| self.config.site_id.clone());

        Ok(UpstreamIdentity {
            subject,
            site_id,
            access_token: body.access_token,
        })
    }
}
