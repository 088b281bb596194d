//! Math tool server: `add`, `multiply` and `evaluate`, over stdio by default.

use std::process;

use clap::{Parser, ValueEnum};
use mcp_relay::tools::math_toolkit;
use mcp_relay::{init_tracing, LogFormat, Result, ToolServer};
use tracing::error;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

/// Serve the math toolkit over MCP
#[derive(Parser)]
#[command(name = "mcp-relay-math")]
#[command(version)]
struct Cli {
    #[arg(long, value_enum, default_value = "stdio")]
    transport: Transport,

    /// Bind address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8001)]
    port: u16,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (compact, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, LogFormat::parse(&cli.log_format));

    if let Err(e) = run(cli).await {
        error!("{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let server = ToolServer::new("math", math_toolkit()?)
        .with_instructions("Integer arithmetic and expression evaluation.");
    match cli.transport {
        Transport::Stdio => server.serve_process_stdio().await,
        Transport::Http => serve_http(server, &cli.host, cli.port).await,
    }
}

#[cfg(feature = "server")]
async fn serve_http(server: ToolServer, host: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    std::sync::Arc::new(server).serve_listener(listener).await
}

#[cfg(not(feature = "server"))]
async fn serve_http(_server: ToolServer, _host: &str, _port: u16) -> Result<()> {
    Err(mcp_relay::RelayError::Configuration(
        "built without the `server` feature; only stdio is available".into(),
    ))
}
