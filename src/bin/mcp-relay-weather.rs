//! Weather tool server: `get_weather`, over HTTP at `/mcp` by default.

use std::process;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use mcp_relay::tools::weather_toolkit;
use mcp_relay::{init_tracing, LogFormat, Result, ToolServer};
use tokio::net::TcpListener;
use tracing::error;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    Http,
    Stdio,
}

/// Serve the weather toolkit over MCP
#[derive(Parser)]
#[command(name = "mcp-relay-weather")]
#[command(version)]
struct Cli {
    #[arg(long, value_enum, default_value = "http")]
    transport: Transport,

    /// Bind address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8000)]
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
    let server = ToolServer::new("weather", weather_toolkit()?);
    match cli.transport {
        Transport::Http => {
            let listener = TcpListener::bind((cli.host.as_str(), cli.port)).await?;
            Arc::new(server).serve_listener(listener).await
        }
        Transport::Stdio => server.serve_process_stdio().await,
    }
}
