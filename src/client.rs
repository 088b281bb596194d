//! Tool discovery across several configured MCP servers.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{RelayConfig, ServerConfig};
use crate::error::{RelayError, Result};
use crate::mcp::{HttpTransport, McpClient, McpTools, McpTransport, StdioTransport};
use crate::tool::{ToolCallRequest, ToolCallResult, ToolDescriptor, ToolRegistry};

type SharedClient = Arc<Mutex<McpClient<Box<dyn McpTransport>>>>;

struct Connection {
    name: String,
    client: SharedClient,
}

/// Connects to every configured server and exposes their tools as one registry.
#[derive(Default)]
pub struct MultiServerClient {
    registry: ToolRegistry,
    connections: Vec<Connection>,
}

impl MultiServerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to the servers in name order. Already opened connections are
    /// closed again if a later server fails.
    pub async fn connect(config: &RelayConfig) -> Result<Self> {
        let mut client = Self::new();
        for (name, server) in &config.servers {
            info!(
                server = %name,
                transport = server.transport_name(),
                timeout = ?server.timeout(),
                "connecting to MCP server"
            );
            let outcome = match Self::transport_for(server) {
                Ok(transport) => client.add_server(name, transport, server.prefix()).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "failed to close connections after error");
                }
                return Err(err);
            }
        }
        Ok(client)
    }

    pub fn transport_for(server: &ServerConfig) -> Result<Box<dyn McpTransport>> {
        Ok(match server {
            ServerConfig::Stdio(cfg) => Box::new(StdioTransport::from_config(cfg)?),
            ServerConfig::Http(cfg) => Box::new(HttpTransport::from_config(cfg)?),
        })
    }

    /// Initializes `transport`, discovers its tools and registers them. Returns the tool count.
    pub async fn add_server(
        &mut self,
        name: &str,
        transport: Box<dyn McpTransport>,
        prefix: Option<&str>,
    ) -> Result<usize> {
        let mut tools = McpTools::new(McpClient::new(transport));
        if let Some(prefix) = prefix {
            tools = tools.with_prefix(prefix);
        }
        let client = tools.client();
        self.connections.push(Connection {
            name: name.to_string(),
            client,
        });

        let mut discovered = ToolRegistry::new();
        let count = tools.register_tools(&mut discovered).await?;
        self.registry.merge(discovered)?;
        info!(server = name, tools = count, "registered server tools");
        Ok(count)
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list_tools()
    }

    /// Calls a tool by name. Unknown names fail before any server is contacted.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        if !self.registry.contains(name) {
            return Err(RelayError::UnknownTool(name.to_string()));
        }
        if !(arguments.is_object() || arguments.is_null()) {
            return Err(RelayError::InvalidArguments {
                name: name.to_string(),
                reason: format!("expected an object, got {arguments}"),
            });
        }
        self.registry.call(name, arguments).await
    }

    pub async fn invoke_request(&self, request: ToolCallRequest) -> Result<ToolCallResult> {
        self.invoke(&request.name, Value::Object(request.arguments)).await
    }

    /// Registry of remote tools, for handing to an [`crate::Agent`].
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.name.as_str()).collect()
    }

    pub async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for connection in &self.connections {
            if let Err(err) = connection.client.lock().await.close().await {
                warn!(server = %connection.name, error = %err, "failed to close server");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
