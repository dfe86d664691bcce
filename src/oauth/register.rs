//! Dynamic client registration (RFC 7591)
//!
//! Registrations live only in memory and expire after the configured TTL;
//! there is deliberately no durable store behind them. Clients that need a
//! stable identity are provisioned statically through configuration.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::oauth::OAuthProvider;

/// RFC 7591 registration request. Unknown metadata fields are accepted and
/// ignored.
#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    /// Redirect URIs the client will use; at least one is required
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Requested token endpoint auth method; `none` marks a public client
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// Human-readable client name, echoed back if present
    #[serde(default)]
    pub client_name: Option<String>,
}

/// RFC 7591 registration response
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Minted client identifier
    pub client_id: String,
    /// Minted secret; absent for public clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Registered redirect URIs, echoed back
    pub redirect_uris: Vec<String>,
    /// Effective token endpoint auth method
    pub token_endpoint_auth_method: String,
    /// Grant types this server supports for the client
    pub grant_types: Vec<String>,
    /// Echoed client name, if provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// RFC 7591 error response
#[derive(Debug, Serialize)]
struct RegistrationError {
    error: &'static str,
    error_description: String,
}

fn invalid_metadata(description: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(RegistrationError {
            error: "invalid_client_metadata",
            error_description: description.into(),
        }),
    )
        .into_response()
}

/// `POST /oauth/register`
pub async fn register(
    State(provider): State<Arc<OAuthProvider>>,
    Json(request): Json<RegistrationRequest>,
) -> Response {
    if request.redirect_uris.is_empty() {
        return invalid_metadata("At least one redirect_uri is required");
    }
    for uri in &request.redirect_uris {
        if Url::parse(uri).is_err() {
            return invalid_metadata(format!("Malformed redirect_uri: {uri}"));
        }
    }

    let auth_method = request
        .token_endpoint_auth_method
        .unwrap_or_else(|| "client_secret_basic".to_string());
    let public_client = auth_method == "none";

    let client = provider
        .registry
        .register(request.redirect_uris.clone(), public_client);

    info!(client_id = %client.client_id, public = public_client, "Registered dynamic client");

    (
        StatusCode::CREATED,
        Json(RegistrationResponse {
            client_id: client.client_id,
            client_secret: client.client_secret,
            redirect_uris: request.redirect_uris,
            token_endpoint_auth_method: auth_method,
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            client_name: request.client_name,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_minimal_body() {
        let request: RegistrationRequest =
            serde_json::from_str(r#"{"redirect_uris": ["https://app.example.com/cb"]}"#).unwrap();
        assert_eq!(request.redirect_uris.len(), 1);
        assert!(request.token_endpoint_auth_method.is_none());
    }

    #[test]
    fn request_tolerates_unknown_fields() {
        let request: RegistrationRequest = serde_json::from_str(
            r#"{
                "redirect_uris": ["https://app.example.com/cb"],
                "client_name": "Reporting",
                "logo_uri": "https://app.example.com/logo.png",
                "contacts": ["ops@example.com"]
            }"#,
        )
        .unwrap();
        assert_eq!(request.client_name.as_deref(), Some("Reporting"));
    }

    #[test]
    fn response_omits_absent_secret() {
        let response = RegistrationResponse {
            client_id: "abc".to_string(),
            client_secret: None,
            redirect_uris: vec!["https://app.example.com/cb".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            grant_types: vec!["authorization_code".to_string()],
            client_name: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("client_secret"));
    }
}
