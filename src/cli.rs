//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tableau MCP server with a built-in OAuth 2.1 authorization server
#[derive(Parser, Debug)]
#[command(name = "tableau-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TABLEAU_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TABLEAU_MCP_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TABLEAU_MCP_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TABLEAU_MCP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TABLEAU_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Validate configuration and key material, then exit
    Check,
}
