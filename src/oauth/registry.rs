//! Client registry: statically provisioned and dynamically registered clients
//!
//! Static clients come from the environment at startup and never expire.
//! Dynamic clients arrive through RFC 7591 registration and are held in an
//! [`ExpiringMap`] so abandoned registrations age out on their own. Lookups
//! check the static set first; a static client id can therefore never be
//! shadowed by a dynamic registration.

use std::collections::HashMap;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::oauth_codes;
use crate::expiring_map::ExpiringMap;
use crate::{Error, Result};

/// A client known to the authorization server
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    /// Unique client identifier
    pub client_id: String,
    /// Secret for confidential clients; `None` for public (PKCE-only) clients
    pub client_secret: Option<String>,
    /// Redirect URIs pinned for this client. Empty means any URI that
    /// passes redirect validation is acceptable.
    pub redirect_uris: Vec<String>,
}

impl RegisteredClient {
    /// Whether `redirect_uri` is acceptable for this client.
    ///
    /// Clients with pinned URIs must match one exactly; clients without
    /// any defer entirely to redirect validation.
    #[must_use]
    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.is_empty() || self.redirect_uris.iter().any(|u| u == redirect_uri)
    }

    /// Whether this client authenticates with a secret.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }
}

/// Registry of static and dynamically registered clients
pub struct ClientRegistry {
    static_clients: HashMap<String, RegisteredClient>,
    dynamic: ExpiringMap<String, RegisteredClient>,
}

impl ClientRegistry {
    /// Build a registry from pre-provisioned `client_id -> client_secret`
    /// pairs, with dynamic registrations expiring after `registration_ttl`.
    ///
    /// A static client with an entry in `static_redirect_uris` is pinned to
    /// exactly those URIs; one without stays free to use any URI that
    /// passes redirect validation.
    #[must_use]
    pub fn new(
        static_pairs: HashMap<String, String>,
        mut static_redirect_uris: HashMap<String, Vec<String>>,
        registration_ttl: Duration,
    ) -> Self {
        let static_clients = static_pairs
            .into_iter()
            .map(|(id, secret)| {
                let client = RegisteredClient {
                    client_id: id.clone(),
                    client_secret: Some(secret),
                    redirect_uris: static_redirect_uris.remove(&id).unwrap_or_default(),
                };
                (id, client)
            })
            .collect();
        Self {
            static_clients,
            dynamic: ExpiringMap::new(registration_ttl),
        }
    }

    /// Mint and store a dynamic client registration.
    ///
    /// Public clients (`token_endpoint_auth_method` of `none`) receive no
    /// secret and must use PKCE; all others receive a generated secret.
    pub fn register(&self, redirect_uris: Vec<String>, public_client: bool) -> RegisteredClient {
        let client = RegisteredClient {
            client_id: generate_url_safe_token(24),
            client_secret: (!public_client).then(|| generate_url_safe_token(32)),
            redirect_uris,
        };
        self.dynamic.insert(client.client_id.clone(), client.clone());
        client
    }

    /// Look up a client by id, static clients first.
    #[must_use]
    pub fn lookup(&self, client_id: &str) -> Option<RegisteredClient> {
        self.static_clients
            .get(client_id)
            .cloned()
            .or_else(|| self.dynamic.get(&client_id.to_string()))
    }

    /// Look up a client and verify the presented secret, if any.
    ///
    /// Confidential clients must present their exact secret; public clients
    /// must present none. Unknown client and bad secret are indistinguishable
    /// to the caller.
    pub fn authenticate(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<RegisteredClient> {
        let denied = || Error::oauth(oauth_codes::INVALID_CLIENT, "Client authentication failed");

        let client = self.lookup(client_id).ok_or_else(denied)?;
        match (&client.client_secret, client_secret) {
            (Some(expected), Some(presented)) if secrets_match(expected, presented) => Ok(client),
            (None, None) => Ok(client),
            _ => Err(denied()),
        }
    }
}

/// Compare two secrets in constant time.
///
/// Both sides are hashed to fixed-size digests first so the comparison
/// neither branches on content nor leaks length.
#[must_use]
pub fn secrets_match(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.ct_eq(&db).into()
}

/// Random URL-safe token of `len` bytes of entropy, base64url-encoded.
#[must_use]
pub fn generate_url_safe_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_static() -> ClientRegistry {
        let mut pairs = HashMap::new();
        pairs.insert("svc-reporting".to_string(), "s3cret".to_string());
        ClientRegistry::new(pairs, HashMap::new(), Duration::from_secs(600))
    }

    #[test]
    fn static_client_resolves() {
        let registry = registry_with_static();
        let client = registry.lookup("svc-reporting").unwrap();
        assert!(client.is_confidential());
        assert!(client.allows_redirect_uri("https://anywhere.example.com/cb"));
    }

    #[test]
    fn dynamic_registration_round_trip() {
        let registry = registry_with_static();
        let client = registry.register(vec!["https://app.example.com/cb".to_string()], false);

        let found = registry.lookup(&client.client_id).unwrap();
        assert_eq!(found.client_secret, client.client_secret);
        assert!(found.allows_redirect_uri("https://app.example.com/cb"));
        assert!(!found.allows_redirect_uri("https://evil.example.com/cb"));
    }

    #[test]
    fn public_client_gets_no_secret() {
        let registry = registry_with_static();
        let client = registry.register(vec!["http://127.0.0.1:8080/cb".to_string()], true);
        assert!(client.client_secret.is_none());
    }

    #[test]
    fn authenticate_accepts_correct_secret() {
        let registry = registry_with_static();
        assert!(registry.authenticate("svc-reporting", Some("s3cret")).is_ok());
    }

    #[test]
    fn authenticate_rejects_wrong_secret_any_length() {
        let registry = registry_with_static();
        // Same length as the real secret
        assert!(registry.authenticate("svc-reporting", Some("s3creT")).is_err());
        // Different length
        assert!(registry.authenticate("svc-reporting", Some("x")).is_err());
        // Missing entirely
        assert!(registry.authenticate("svc-reporting", None).is_err());
    }

    #[test]
    fn authenticate_rejects_unknown_client() {
        let registry = registry_with_static();
        assert!(registry.authenticate("nobody", Some("s3cret")).is_err());
    }

    #[test]
    fn public_client_authenticates_without_secret() {
        let registry = registry_with_static();
        let client = registry.register(vec!["http://localhost/cb".to_string()], true);

        assert!(registry.authenticate(&client.client_id, None).is_ok());
        // A secret where none is registered is a failure, not a no-op
        assert!(registry.authenticate(&client.client_id, Some("guess")).is_err());
    }

    #[test]
    fn static_client_with_allowlist_is_pinned() {
        let mut pairs = HashMap::new();
        pairs.insert("svc-reporting".to_string(), "s3cret".to_string());
        let mut uris = HashMap::new();
        uris.insert(
            "svc-reporting".to_string(),
            vec!["https://reports.example.com/cb".to_string()],
        );
        let registry = ClientRegistry::new(pairs, uris, Duration::from_secs(600));

        let client = registry.lookup("svc-reporting").unwrap();
        assert!(client.allows_redirect_uri("https://reports.example.com/cb"));
        assert!(!client.allows_redirect_uri("https://anywhere.example.com/cb"));
    }

    #[test]
    fn dynamic_registration_expires() {
        let registry =
            ClientRegistry::new(HashMap::new(), HashMap::new(), Duration::from_millis(1));
        let client = registry.register(vec!["https://app.example.com/cb".to_string()], false);

        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.lookup(&client.client_id).is_none());
    }

    #[test]
    fn secrets_match_is_length_agnostic() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abcd"));
        assert!(!secrets_match("", "abc"));
        assert!(secrets_match("", ""));
    }

    #[test]
    fn generated_tokens_are_unique_and_url_safe() {
        let a = generate_url_safe_token(32);
        let b = generate_url_safe_token(32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
