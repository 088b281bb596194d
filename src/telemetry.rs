//! Log output for the relay binaries.
//!
//! Everything goes to stderr: stdout carries the stdio protocol for the tool
//! servers and the printed answers for the client.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Maps `-v` repetitions to a default level.
pub fn verbosity_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn default_filter(verbosity: u8) -> String {
    let level = verbosity_level(verbosity).to_string().to_lowercase();
    // Dependency chatter stays quiet unless RUST_LOG asks for it.
    format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,h2=warn")
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `verbosity`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
