//! Tableau MCP server with a built-in OAuth 2.1 authorization server.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tableau_mcp::{
    cli::{Cli, Command},
    config::Config,
    oauth::KeyProvider,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Validate configuration and key material without serving.
fn run_check(cli: &Cli) -> ExitCode {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    if let Err(e) = config.validate() {
        error!("Configuration invalid: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = KeyProvider::from_config(&config.oauth) {
        error!("Key material invalid: {e}");
        return ExitCode::FAILURE;
    }

    info!(issuer = %config.oauth.issuer, "Configuration and key material OK");
    ExitCode::SUCCESS
}

/// Run the server until shutdown.
async fn run_server(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> Result<Config, ExitCode> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host.clone_from(host);
            }
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            Err(ExitCode::FAILURE)
        }
    }
}
