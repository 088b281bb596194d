use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const API_KEY_ENV: &str = "GROQ_API_KEY";

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ModelConfig {
    pub fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                RelayError::Configuration(format!(
                    "missing model API key; set {API_KEY_ENV} or `model.api_key`"
                ))
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "groq".into()
}

fn default_model() -> String {
    "qwen-qwq-32b".into()
}

fn default_model_timeout() -> u64 {
    120
}

fn default_server_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StdioServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_server_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpServerConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_server_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// How to reach one tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ServerConfig {
    Stdio(StdioServerConfig),
    Http(HttpServerConfig),
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            ServerConfig::Stdio(cfg) => cfg.timeout_secs,
            ServerConfig::Http(cfg) => cfg.timeout_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            ServerConfig::Stdio(cfg) => cfg.prefix.as_deref(),
            ServerConfig::Http(cfg) => cfg.prefix.as_deref(),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        match self {
            ServerConfig::Stdio(_) => "stdio",
            ServerConfig::Http(_) => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_servers")]
    pub servers: BTreeMap<String, ServerConfig>,
}

fn default_servers() -> BTreeMap<String, ServerConfig> {
    let mut servers = BTreeMap::new();
    servers.insert(
        "math".to_string(),
        ServerConfig::Stdio(StdioServerConfig {
            command: "mcp-relay-math".into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout_secs: default_server_timeout(),
            prefix: None,
        }),
    );
    servers.insert(
        "weather".to_string(),
        ServerConfig::Http(HttpServerConfig {
            url: "http://127.0.0.1:8000/mcp".into(),
            headers: HashMap::new(),
            timeout_secs: default_server_timeout(),
            prefix: None,
        }),
    );
    servers
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            servers: default_servers(),
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| {
            RelayError::Configuration(format!("Failed to parse configuration: {err}"))
        })
    }

    /// Built-in defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg
    }

    pub fn from_env_or_file(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("RELAY_MODEL") {
            self.model.model = model;
        }
        if let Some(base_url) = lookup("RELAY_MODEL_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Some(url) = lookup("RELAY_WEATHER_URL") {
            if let Some(ServerConfig::Http(cfg)) = self.servers.get_mut("weather") {
                cfg.url = url;
            }
        }
        if let Some(command) = lookup("RELAY_MATH_COMMAND") {
            if let Some(ServerConfig::Stdio(cfg)) = self.servers.get_mut("math") {
                cfg.command = command;
            }
        }
    }
}
