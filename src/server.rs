//! Serving a [`ToolRegistry`] as an MCP tool server.
//!
//! [`ToolServer::handle`] implements the protocol; `serve_stdio` and the axum
//! [`ToolServer::router`] only move JSON-RPC messages in and out.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mcp::{
    CallToolResult, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpToolDefinition, ServerCapabilities, ServerInfo, JSONRPC_VERSION,
    PROTOCOL_VERSION,
};
use crate::tool::{ToolCallResult, ToolRegistry};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub struct ToolServer {
    info: ServerInfo,
    tools: ToolRegistry,
    instructions: Option<String>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
            tools,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Parses one raw message; `Err` carries the error response to send back.
    pub fn parse_request(raw: &str) -> std::result::Result<JsonRpcRequest, JsonRpcResponse> {
        let value: Value = serde_json::from_str(raw).map_err(|err| {
            JsonRpcResponse::failure(
                None,
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("Parse error: {err}")),
            )
        })?;
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value(id).ok());
        serde_json::from_value(value).map_err(|err| {
            JsonRpcResponse::failure(
                id,
                JsonRpcError::new(
                    JsonRpcError::INVALID_REQUEST,
                    format!("Invalid request: {err}"),
                ),
            )
        })
    }

    /// Handles a raw line or body. Returns `None` when nothing should be sent back.
    pub async fn handle_raw(&self, raw: &str) -> Option<JsonRpcResponse> {
        match Self::parse_request(raw) {
            Ok(request) => self.handle(request).await,
            Err(response) => Some(response),
        }
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "notification received");
            return None;
        }
        let id = request.id.clone();
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::new(
                    JsonRpcError::INVALID_REQUEST,
                    format!("unsupported jsonrpc version `{}`", request.jsonrpc),
                ),
            ));
        }

        debug!(method = %request.method, id = ?id, "request received");
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let protocol_version = match requested {
            Some(version) if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) => version,
            _ => PROTOCOL_VERSION,
        };
        let result = InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({ "listChanged": false })),
                ..ServerCapabilities::default()
            },
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        };
        json!(result)
    }

    fn list_tools(&self) -> Value {
        let tools = self
            .tools
            .list_tools()
            .into_iter()
            .map(|descriptor| McpToolDefinition {
                input_schema: descriptor.input_schema.to_json_schema(),
                description: Some(descriptor.description),
                name: descriptor.name,
            })
            .collect();
        let result = ListToolsResult {
            tools,
            next_cursor: None,
        };
        json!(result)
    }

    async fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "missing params"))
            .and_then(|raw| {
                serde_json::from_value(raw).map_err(|err| {
                    JsonRpcError::new(
                        JsonRpcError::INVALID_PARAMS,
                        format!("Invalid params: {err}"),
                    )
                })
            })?;

        let tool = self.tools.get(&params.name).ok_or_else(|| {
            JsonRpcError::new(
                JsonRpcError::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            )
        })?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let result = match tool.input_schema().validate(&params.name, &arguments) {
            Err(err) => ToolCallResult::failure(err.to_string()),
            Ok(()) => match tool.call(arguments).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(tool = %params.name, error = %err, "tool call failed");
                    ToolCallResult::failure(err.to_string())
                }
            },
        };
        let result = CallToolResult::from(result);
        Ok(json!(result))
    }

    /// Serves line-delimited JSON-RPC until `reader` reaches EOF.
    ///
    /// A line that is not valid UTF-8 gets a parse error reply; the loop keeps going.
    pub async fn serve_stdio<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.info.name, tools = self.tools.len(), "serving over stdio");
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            let response = match std::str::from_utf8(&line) {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => self.handle_raw(text.trim()).await,
                Err(err) => {
                    warn!(error = %err, "received a line that is not UTF-8");
                    Some(JsonRpcResponse::failure(
                        None,
                        JsonRpcError::new(
                            JsonRpcError::PARSE_ERROR,
                            format!("Parse error: {err}"),
                        ),
                    ))
                }
            };
            if let Some(response) = response {
                let mut encoded = serde_json::to_string(&response)?;
                encoded.push('\n');
                writer.write_all(encoded.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        debug!("stdin closed, stopping");
        Ok(())
    }

    pub async fn serve_process_stdio(&self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve_stdio(stdin, tokio::io::stdout()).await
    }
}

#[cfg(feature = "server")]
mod http {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use tracing::{debug, info};

    use super::ToolServer;
    use crate::error::{RelayError, Result};
    use crate::mcp::SESSION_HEADER;

    impl ToolServer {
        /// `POST /mcp` for JSON-RPC messages, `DELETE /mcp` to end a session, `GET /health`.
        pub fn router(self: Arc<Self>) -> Router {
            Router::new()
                .route("/health", get(|| async { "ok" }))
                .route("/mcp", post(handle_mcp).delete(end_session))
                .with_state(self)
        }

        pub async fn serve_http(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
            let listener = TcpListener::bind(addr).await?;
            self.serve_listener(listener).await
        }

        pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
            info!(
                server = %self.info().name,
                addr = %listener.local_addr()?,
                "serving over HTTP at /mcp"
            );
            axum::serve(listener, self.router().into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|err| RelayError::Transport(format!("server error: {err}")))
        }
    }

    async fn shutdown_signal() {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; run until the process is killed.
            std::future::pending::<()>().await;
        }
    }

    async fn handle_mcp(
        State(server): State<Arc<ToolServer>>,
        headers: HeaderMap,
        body: String,
    ) -> Response {
        let request = match ToolServer::parse_request(&body) {
            Ok(request) => request,
            Err(error) => return (StatusCode::BAD_REQUEST, Json(error)).into_response(),
        };
        let is_initialize = request.method == "initialize";

        let Some(response) = server.handle(request).await else {
            return StatusCode::ACCEPTED.into_response();
        };

        let mut response = Json(response).into_response();
        let session = if is_initialize {
            Some(uuid::Uuid::new_v4().to_string())
        } else {
            headers
                .get(SESSION_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        if let Some(session) = session {
            if let Ok(value) = HeaderValue::from_str(&session) {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
        }
        response
    }

    async fn end_session(headers: HeaderMap) -> StatusCode {
        match headers.get(SESSION_HEADER) {
            Some(session) => {
                debug!(session = ?session, "session ended");
                StatusCode::NO_CONTENT
            }
            None => StatusCode::BAD_REQUEST,
        }
    }
}
