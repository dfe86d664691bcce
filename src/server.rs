//! HTTP server wiring
//!
//! Assembles the OAuth routes, the discovery documents, the health probe,
//! and the bearer-protected MCP endpoint into one axum application with
//! tracing, panic-catching, and a request timeout, then serves it with
//! graceful shutdown.

use std::sync::Arc;

use axum::extract::Extension;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::oauth::{self, AuthInfo, OAuthProvider, auth_middleware};
use crate::{Error, Result};

/// The Tableau MCP server
pub struct Server {
    config: Config,
    provider: Arc<OAuthProvider>,
}

impl Server {
    /// Build the server from configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or unloadable key material; the
    /// process refuses to start rather than serve in a broken state.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(OAuthProvider::from_config(&config)?);
        Ok(Self { config, provider })
    }

    /// Build the server around an already-constructed provider (tests
    /// inject a fake resolver and ephemeral keys this way).
    #[must_use]
    pub fn with_provider(config: Config, provider: Arc<OAuthProvider>) -> Self {
        Self { config, provider }
    }

    /// The assembled application router.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.provider), self.config.server.request_timeout)
    }

    /// Serve until a shutdown signal arrives, then drain within the
    /// configured shutdown timeout.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            %addr,
            issuer = %self.provider.issuer(),
            "Starting Tableau MCP server"
        );

        let app = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        wait_for_signal().await;
        info!("Shutdown signal received, draining in-flight requests");
        let _ = shutdown_tx.send(());

        match tokio::time::timeout(self.config.server.shutdown_timeout, server_task).await {
            Ok(joined) => joined
                .map_err(|e| Error::Internal(format!("Server task panicked: {e}")))?
                .map_err(Error::Io)?,
            Err(_) => {
                warn!("Graceful shutdown timed out, aborting remaining requests");
            }
        }

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Assemble the full application: OAuth routes are public, the MCP endpoint
/// sits behind the auth middleware.
pub fn create_router(provider: Arc<OAuthProvider>, request_timeout: std::time::Duration) -> Router {
    let protected = Router::new()
        .route("/mcp", post(mcp_endpoint))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&provider),
            auth_middleware,
        ));

    oauth::router(Arc::clone(&provider))
        .merge(protected)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
}

/// Liveness probe; deliberately unauthenticated.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Minimal JSON-RPC surface behind the auth middleware. Tool handlers read
/// the caller's identity from the [`AuthInfo`] extension; they never see or
/// re-validate the bearer token itself.
async fn mcp_endpoint(
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<Value>,
) -> Json<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");

    let response = match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": crate::MCP_PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "tableau-mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            }
        }),
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        "whoami" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "subject": auth.subject,
                "scopes": auth.scopes,
                "siteId": auth.site_id,
                "targetUrl": auth.target_url,
            }
        }),
        other => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {other}") }
        }),
    };

    Json(response)
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        let terminate = async {
            if let Ok(mut signal) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                signal.recv().await;
            }
        };
        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
