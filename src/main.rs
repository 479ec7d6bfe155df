//! browsergate-mcp - MCP server gating browser automation
//!
//! This binary serves the MCP protocol over stdio, exposing browser tools to
//! AI assistants while enforcing auth and security policy.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use browsergate_mcp::config::{McpConfig, TransportKind};
use browsergate_mcp::driver::DetachedDriver;
use browsergate_mcp::{BrowserGateService, ServiceOptions};

/// MCP server gating browser automation behind auth and security policy.
#[derive(Parser, Debug)]
#[command(name = "browsergate-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in stdio mode (standard MCP transport).
    #[arg(long, default_value = "true")]
    stdio: bool,

    /// Path to the JSON config file (overrides MCP_CONFIG_PATH).
    #[arg(long)]
    config: Option<String>,

    /// Auth token (overrides MCP_AUTH_TOKEN and the config file).
    #[arg(long)]
    auth_token: Option<String>,

    /// Browser CDP endpoint (overrides BROWSER_CDP_URL and the config file).
    #[arg(long)]
    cdp_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Log to stderr (not stdout, which is used for MCP protocol)
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match args.config {
        Some(ref path) => McpConfig::load_from(std::path::Path::new(path)),
        None => McpConfig::load(),
    };

    tracing::info!(
        "Starting {} v{}",
        config.server.name,
        config.server.version
    );

    if config.transport.kind != TransportKind::Stdio {
        tracing::error!("Only the stdio transport is currently supported");
        return ExitCode::FAILURE;
    }

    let options = ServiceOptions {
        auth_token: args.auth_token,
        cdp_url: args.cdp_url,
    };

    let service = match BrowserGateService::new(config, Arc::new(DetachedDriver), options) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to build service: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.stdio {
        match service.run_stdio().await {
            Ok(()) => {
                tracing::info!("Server exited cleanly");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("Server error: {e}");
                ExitCode::FAILURE
            }
        }
    } else {
        tracing::error!("Only stdio mode is currently supported");
        ExitCode::FAILURE
    }
}
