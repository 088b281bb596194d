//! Demo client: asks one math and one weather question through MCP tool servers.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use mcp_relay::{
    init_tracing, Agent, GroqClient, LogFormat, MultiServerClient, RelayConfig, Result,
    ServerConfig,
};
use tracing::{error, info};

const MATH_QUESTION: &str = "What is (3 + 5) * 12 ?";
const WEATHER_QUESTION: &str = "what is the weather in New Jersey?";
const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools to answer, then reply briefly.";

/// Ask an agent questions answered by MCP tool servers
#[derive(Parser)]
#[command(name = "mcp-relay")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (compact, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, LogFormat::parse(&cli.log_format));

    if let Err(e) = run(cli).await {
        error!("{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = RelayConfig::from_env_or_file(cli.config.as_deref())?;
    resolve_sibling_servers(&mut config);

    // Built before any server is contacted so a missing key fails fast.
    let model = Arc::new(GroqClient::from_config(&config.model)?);
    info!(model = model.model(), "model client ready");

    let client = MultiServerClient::connect(&config).await?;
    let agent = Agent::new(model)
        .with_system_prompt(SYSTEM_PROMPT)
        .with_tools(client.registry().clone());

    let outcome = ask_both(&agent).await;
    client.close().await?;
    let (math, weather) = outcome?;

    println!("math response: \n {math}");
    println!("weather response: \n {weather}");
    Ok(())
}

async fn ask_both(agent: &Agent<GroqClient>) -> Result<(String, String)> {
    let math = agent.respond(MATH_QUESTION).await?;
    let weather = agent.respond(WEATHER_QUESTION).await?;
    Ok((math, weather))
}

/// Bare server commands resolve to binaries installed next to this one, if present.
fn resolve_sibling_servers(config: &mut RelayConfig) {
    let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    else {
        return;
    };
    for server in config.servers.values_mut() {
        if let ServerConfig::Stdio(cfg) = server {
            if cfg.command.contains(std::path::MAIN_SEPARATOR) {
                continue;
            }
            let candidate = dir.join(format!("{}{}", cfg.command, std::env::consts::EXE_SUFFIX));
            if candidate.is_file() {
                cfg.command = candidate.to_string_lossy().into_owned();
            }
        }
    }
}
