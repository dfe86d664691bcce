//! Error types for the Tableau MCP server

use std::io;

use thiserror::Error;

/// Result type alias for the Tableau MCP server
pub type Result<T> = std::result::Result<T, Error>;

/// Tableau MCP server errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing/encryption key could not be loaded or used
    #[error("Key error: {0}")]
    Key(String),

    /// OAuth protocol error (RFC 6749 vocabulary)
    #[error("OAuth error {code}: {description}")]
    OAuth {
        /// RFC 6749 error code (`invalid_request`, `invalid_client`, ...)
        code: &'static str,
        /// Human-readable description, safe to return to the client
        description: String,
    },

    /// Upstream identity provider rejected the request or the user declined
    #[error("Upstream identity provider denied the request: {0}")]
    UpstreamDenied(String),

    /// Upstream identity provider unreachable, timed out, or answered
    /// unintelligibly
    #[error("Upstream identity provider error: {0}")]
    Upstream(String),

    /// Redirect target failed DNS-pinned validation
    #[error("Redirect validation failed: {0}")]
    RedirectBlocked(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an OAuth protocol error with the given RFC 6749 code.
    pub fn oauth(code: &'static str, description: impl Into<String>) -> Self {
        Self::OAuth {
            code,
            description: description.into(),
        }
    }

    /// The RFC 6749 error code for this error, defaulting to `server_error`.
    #[must_use]
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::OAuth { code, .. } => code,
            Self::UpstreamDenied(_) => "access_denied",
            Self::RedirectBlocked(_) => "invalid_request",
            _ => "server_error",
        }
    }
}

/// RFC 6749 error codes used across the OAuth handlers
pub mod oauth_codes {
    /// Malformed or missing parameters
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// Unknown client or bad credentials
    pub const INVALID_CLIENT: &str = "invalid_client";
    /// Expired/consumed/mismatched code, verifier, or refresh token
    pub const INVALID_GRANT: &str = "invalid_grant";
    /// Unrecognized `grant_type`
    pub const UNSUPPORTED_GRANT_TYPE: &str = "unsupported_grant_type";
    /// Upstream rejected or the user declined
    pub const ACCESS_DENIED: &str = "access_denied";
    /// Key-loading or upstream-connectivity failure
    pub const SERVER_ERROR: &str = "server_error";
}
