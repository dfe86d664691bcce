//! Asymmetric keypair loading and token encode/decode
//!
//! The server mints self-describing encrypted bearer tokens instead of
//! storing access tokens server-side: claims are serialized, encrypted
//! under a fresh AES-256-GCM content key, and the content key is wrapped
//! with RSA-OAEP(SHA-256) under the server's public key. Validation
//! unwraps with the private key, so it is O(1), stateless, and safe
//! across multiple instances holding the same keypair. The trade-off is
//! that access tokens cannot be revoked before `exp`; only refresh
//! tokens, which stay server-side, are revocable.
//!
//! The keypair is loaded once at startup from inline PEM or a file
//! (optionally passphrase-protected PKCS#8); a malformed or unreadable
//! key refuses startup rather than serving with a broken key. Raw key
//! material is never logged.

use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use serde::{Deserialize, Serialize};

use crate::config::OAuthConfig;
use crate::{Error, Result};

/// Fixed audience identifying this resource. Tokens carrying any other
/// audience are rejected.
pub const AUDIENCE: &str = "tableau-mcp";

/// Claim set carried inside an encrypted bearer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Issuer URL of this server
    pub iss: String,
    /// Audience; must equal [`AUDIENCE`]
    pub aud: String,
    /// Subject (upstream user identifier)
    pub sub: String,
    /// Space-separated granted scopes
    pub scope: String,
    /// Expiry as Unix seconds
    pub exp: u64,
    /// Tableau site the subject authenticated against
    #[serde(rename = "tableau.com/siteId", default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    /// Tableau server URL tool handlers should target
    #[serde(rename = "tableau.com/targetUrl", default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Upstream access token, riding encrypted so tool handlers can reuse it
    #[serde(rename = "tableau.com/accessToken", default, skip_serializing_if = "Option::is_none")]
    pub upstream_token: Option<String>,
}

impl Claims {
    /// Whether this claim set has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.exp <= unix_now()
    }

    /// Validate expiry and audience.
    pub fn validate(&self) -> Result<()> {
        if self.is_expired() {
            return Err(Error::oauth("invalid_grant", "Token expired"));
        }
        if self.aud != AUDIENCE {
            return Err(Error::oauth("invalid_grant", "Token audience mismatch"));
        }
        Ok(())
    }

    /// Scope string split into individual scopes.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Expiry timestamp `lifetime` from now.
pub fn expiry_in(lifetime: Duration) -> u64 {
    unix_now() + lifetime.as_secs()
}

/// Process-wide asymmetric keypair with token encrypt/decrypt
pub struct KeyProvider {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl KeyProvider {
    /// Load the keypair from configuration (inline PEM wins over the path).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] if the key is missing, unreadable, or
    /// malformed. Callers treat this as fatal at startup.
    pub fn from_config(config: &OAuthConfig) -> Result<Self> {
        let pem = if let Some(ref inline) = config.private_key {
            inline.clone()
        } else if let Some(ref path) = config.private_key_path {
            fs::read_to_string(path)
                .map_err(|e| Error::Key(format!("Cannot read private key file {path}: {e}")))?
        } else {
            return Err(Error::Key("No private key configured".to_string()));
        };

        Self::from_pem(&pem, config.private_key_passphrase.as_deref())
    }

    /// Parse a PEM private key and derive the public key.
    pub fn from_pem(pem: &str, passphrase: Option<&str>) -> Result<Self> {
        let private_key = if let Some(pass) = passphrase {
            RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass)
                .map_err(|e| Error::Key(format!("Invalid encrypted private key: {e}")))?
        } else {
            // PKCS#8 ("BEGIN PRIVATE KEY") first, PKCS#1 ("BEGIN RSA
            // PRIVATE KEY") as fallback
            RsaPrivateKey::from_pkcs8_pem(pem)
                .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                .map_err(|e| Error::Key(format!("Invalid private key: {e}")))?
        };

        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Generate an ephemeral 2048-bit keypair (development and tests).
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| Error::Key(format!("Key generation failed: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Encrypt a claim set into a compact three-part bearer token:
    /// `base64url(wrapped_cek).base64url(nonce).base64url(ciphertext)`.
    pub fn encrypt(&self, claims: &Claims) -> Result<String> {
        let plaintext = serde_json::to_vec(claims)?;

        let mut cek = [0u8; 32];
        OsRng.fill_bytes(&mut cek);
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&cek)
            .map_err(|e| Error::Key(format!("Cipher init failed: {e}")))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| Error::Key(format!("Token encryption failed: {e}")))?;

        let wrapped_cek = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &cek)
            .map_err(|e| Error::Key(format!("Key wrap failed: {e}")))?;

        Ok(format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(wrapped_cek),
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext),
        ))
    }

    /// Decrypt a bearer token back into its claim set.
    ///
    /// Any structural or cryptographic failure yields an `invalid_grant`
    /// style error with no internal detail; callers map it to `401`.
    pub fn decrypt(&self, token: &str) -> Result<Claims> {
        let invalid = || Error::oauth("invalid_grant", "Malformed token");

        let mut parts = token.split('.');
        let (wrapped, nonce, ciphertext) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c), None) => (a, b, c),
            _ => return Err(invalid()),
        };

        let wrapped = URL_SAFE_NO_PAD.decode(wrapped).map_err(|_| invalid())?;
        let nonce = URL_SAFE_NO_PAD.decode(nonce).map_err(|_| invalid())?;
        let ciphertext = URL_SAFE_NO_PAD.decode(ciphertext).map_err(|_| invalid())?;
        if nonce.len() != 12 {
            return Err(invalid());
        }

        let cek = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| invalid())?;

        let cipher = Aes256Gcm::new_from_slice(&cek).map_err(|_| invalid())?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| invalid())?;

        serde_json::from_slice(&plaintext).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    fn test_claims() -> Claims {
        Claims {
            iss: "https://mcp.example.com".to_string(),
            aud: AUDIENCE.to_string(),
            sub: "user-1".to_string(),
            scope: "tableau:content:read".to_string(),
            exp: unix_now() + 3600,
            site_id: Some("finance".to_string()),
            target_url: None,
            upstream_token: Some("upstream-token".to_string()),
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let keys = KeyProvider::generate().unwrap();
        let claims = test_claims();

        let token = keys.encrypt(&claims).unwrap();
        let decrypted = keys.decrypt(&token).unwrap();

        assert_eq!(decrypted, claims);
    }

    #[test]
    fn token_is_opaque_to_inspection() {
        let keys = KeyProvider::generate().unwrap();
        let token = keys.encrypt(&test_claims()).unwrap();

        // Encrypted, not merely signed: the claims must not be readable
        assert!(!token.contains("user-1"));
        assert!(!token.contains("tableau"));
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let keys = KeyProvider::generate().unwrap();
        assert!(keys.decrypt("not-a-token").is_err());
        assert!(keys.decrypt("a.b.c").is_err());
        assert!(keys.decrypt("").is_err());
    }

    #[test]
    fn decrypt_rejects_token_from_other_keypair() {
        let keys = KeyProvider::generate().unwrap();
        let other = KeyProvider::generate().unwrap();

        let token = keys.encrypt(&test_claims()).unwrap();
        assert!(other.decrypt(&token).is_err());
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let keys = KeyProvider::generate().unwrap();
        let token = keys.encrypt(&test_claims()).unwrap();

        let mut tampered: Vec<&str> = token.split('.').collect();
        let flipped = format!("{}AA", tampered[2]);
        tampered[2] = &flipped;
        assert!(keys.decrypt(&tampered.join(".")).is_err());
    }

    #[test]
    fn claims_validate_checks_expiry_and_audience() {
        let mut claims = test_claims();
        assert!(claims.validate().is_ok());

        claims.exp = unix_now().saturating_sub(10);
        assert!(claims.validate().is_err());

        claims.exp = unix_now() + 3600;
        claims.aud = "someone-else".to_string();
        assert!(claims.validate().is_err());
    }

    #[test]
    fn claims_scopes_split_on_whitespace() {
        let mut claims = test_claims();
        claims.scope = "read write".to_string();
        assert_eq!(claims.scopes(), vec!["read", "write"]);
    }

    #[test]
    fn from_pem_parses_generated_pkcs8() {
        let keys = KeyProvider::generate().unwrap();
        let pem = keys
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .unwrap()
            .to_string();

        let reloaded = KeyProvider::from_pem(&pem, None).unwrap();
        let token = keys.encrypt(&test_claims()).unwrap();
        assert!(reloaded.decrypt(&token).is_ok());
    }

    #[test]
    fn from_pem_rejects_garbage() {
        assert!(KeyProvider::from_pem("not a pem", None).is_err());
    }

    #[test]
    fn from_config_loads_key_from_file() {
        let keys = KeyProvider::generate().unwrap();
        let pem = keys
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .unwrap()
            .to_string();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, pem).unwrap();

        let config = crate::config::OAuthConfig {
            private_key_path: Some(path.to_string_lossy().into_owned()),
            ..crate::config::OAuthConfig::default()
        };
        let loaded = KeyProvider::from_config(&config).unwrap();

        let token = keys.encrypt(&test_claims()).unwrap();
        assert!(loaded.decrypt(&token).is_ok());
    }

    #[test]
    fn from_config_fails_on_missing_key_file() {
        let config = crate::config::OAuthConfig {
            private_key_path: Some("/nonexistent/key.pem".to_string()),
            ..crate::config::OAuthConfig::default()
        };
        assert!(KeyProvider::from_config(&config).is_err());
    }

    #[test]
    fn from_pem_loads_encrypted_pkcs8_with_passphrase() {
        let keys = KeyProvider::generate().unwrap();
        let pem = keys
            .private_key
            .to_pkcs8_encrypted_pem(&mut OsRng, "hunter2", LineEnding::LF)
            .unwrap()
            .to_string();

        let reloaded = KeyProvider::from_pem(&pem, Some("hunter2")).unwrap();
        let token = keys.encrypt(&test_claims()).unwrap();
        assert!(reloaded.decrypt(&token).is_ok());

        assert!(KeyProvider::from_pem(&pem, Some("wrong")).is_err());
        // An encrypted key without its passphrase is unreadable
        assert!(KeyProvider::from_pem(&pem, None).is_err());
    }

    #[test]
    fn from_config_requires_key_material() {
        let config = crate::config::OAuthConfig::default();
        assert!(KeyProvider::from_config(&config).is_err());
    }
}
