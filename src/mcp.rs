//! MCP (Model Context Protocol) client support.
//!
//! Only the subset needed to discover and invoke tools is implemented:
//! the `initialize` handshake, `tools/list` and `tools/call`.
//!
//! # Transport Types
//! - **Stdio**: Launch a server as a subprocess and exchange one JSON-RPC message per line
//! - **HTTP**: POST each JSON-RPC message to a `/mcp` endpoint (JSON or SSE response body)
//!
//! # Example
//! ```rust,ignore
//! use mcp_relay::mcp::{McpClient, StdioTransport};
//!
//! let transport = StdioTransport::new("mcp-relay-math", &[], Duration::from_secs(30))?;
//! let mut client = McpClient::new(transport);
//! let tools = client.list_tools().await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{HttpServerConfig, StdioServerConfig};
use crate::error::{RelayError, Result};
use crate::tool::{InputSchema, Tool, ToolCallResult, ToolRegistry};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";

// ─────────────────────────────────────────────────────────────────────────────
// JSON-RPC Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC request. A request without an `id` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(id)),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Server-initiated requests and notifications parse as responses too; they
    /// carry neither field.
    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(RelayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| RelayError::Protocol("response carries neither result nor error".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// Tool definition as it travels in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Image { .. } => "[image]".to_string(),
                ContentItem::Resource { resource } => format!("[resource: {resource}]"),
                ContentItem::Unsupported => "[unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<CallToolResult> for ToolCallResult {
    fn from(result: CallToolResult) -> Self {
        let text = result.text();
        if result.is_error {
            ToolCallResult::failure(text)
        } else {
            ToolCallResult::text(text)
        }
    }
}

impl From<ToolCallResult> for CallToolResult {
    fn from(result: ToolCallResult) -> Self {
        Self {
            is_error: result.is_error(),
            content: vec![ContentItem::Text {
                text: result.as_text(),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Transport layer for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response with the same id
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected
    async fn notify(&self, notification: JsonRpcRequest) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl McpTransport for Box<dyn McpTransport> {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        (**self).send(request).await
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        (**self).notify(notification).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: McpTransport + ?Sized> McpTransport for Arc<T> {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        (**self).send(request).await
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        (**self).notify(notification).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport that communicates with an MCP server via HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_headers(url, HashMap::new(), timeout)
    }

    /// Create with custom headers (e.g., for authentication)
    pub fn with_headers(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::try_from(key.as_str()).map_err(|err| {
                RelayError::Configuration(format!("invalid header name `{key}`: {err}"))
            })?;
            let value = reqwest::header::HeaderValue::try_from(value).map_err(|err| {
                RelayError::Configuration(format!("invalid value for header `{key}`: {err}"))
            })?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| RelayError::Configuration(format!("http client error: {err}")))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            session_id: RwLock::new(None),
        })
    }

    pub fn from_config(cfg: &HttpServerConfig) -> Result<Self> {
        Self::with_headers(
            cfg.url.clone(),
            cfg.headers.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.map_err(|err| self.request_error(err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!(
                "{} returned {status}: {body}",
                self.url
            )));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let mut guard = self.session_id.write().await;
            if guard.as_deref() != Some(session) {
                debug!(url = %self.url, session, "MCP session established");
                *guard = Some(session.to_string());
            }
        }
        Ok(response)
    }

    fn request_error(&self, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::Transport(format!(
                "request to {} timed out after {:?}",
                self.url, self.timeout
            ))
        } else {
            RelayError::Transport(format!("HTTP request to {} failed: {err}", self.url))
        }
    }

    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: Option<&RequestId>,
    ) -> Result<JsonRpcResponse> {
        match next_event_response(response.bytes_stream(), id).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(RelayError::Transport(format!(
                "event stream from {} ended without a response",
                self.url
            ))),
            Err(err) => Err(self.request_error(err)),
        }
    }
}

/// Reads server-sent events until one carries the response to `id`.
///
/// Bytes are buffered until an event is complete, so multi-byte characters
/// split across chunks decode intact.
async fn next_event_response<S, B, E>(
    stream: S,
    id: Option<&RequestId>,
) -> std::result::Result<Option<JsonRpcResponse>, E>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(chunk?.as_ref());
        for data in drain_sse_events(&mut buffer) {
            if let Some(response) = match_response(&data, id) {
                return Ok(Some(response));
            }
        }
    }
    buffer.extend_from_slice(b"\n\n");
    Ok(drain_sse_events(&mut buffer)
        .iter()
        .find_map(|data| match_response(data, id)))
}

/// Start of the first blank line in `buffer` and the length of the separator.
fn event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|at| (at, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|at| (at, 4));
    match (lf, crlf) {
        (Some(lf), Some(crlf)) => Some(if lf.0 <= crlf.0 { lf } else { crlf }),
        (lf, crlf) => lf.or(crlf),
    }
}

/// Removes every complete event from `buffer` and returns their joined `data:` payloads.
pub(crate) fn drain_sse_events(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut events = Vec::new();
    while let Some((end, separator)) = event_boundary(buffer) {
        let block: Vec<u8> = buffer.drain(..end + separator).collect();
        let block = match std::str::from_utf8(&block[..end]) {
            Ok(block) => block,
            Err(err) => {
                warn!(error = %err, "skipping event that is not valid UTF-8");
                continue;
            }
        };
        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|payload| payload.strip_prefix(' ').unwrap_or(payload))
            .collect();
        if !data.is_empty() {
            events.push(data.join("\n"));
        }
    }
    events
}

fn match_response(raw: &str, id: Option<&RequestId>) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcResponse>(raw) {
        Ok(response) if response.is_response() && response.id.as_ref() == id => Some(response),
        Ok(_) => {
            debug!(payload = raw, "skipping unrelated message");
            None
        }
        Err(err) => {
            warn!(payload = raw, error = %err, "skipping unparsable message");
            None
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        debug!(url = %self.url, method = %request.method, "sending request");
        let response = self.post(&request).await?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            return self.read_event_stream(response, request.id.as_ref()).await;
        }

        let body = response.text().await.map_err(|err| self.request_error(err))?;
        let parsed: JsonRpcResponse = serde_json::from_str(&body).map_err(|err| {
            RelayError::Transport(format!("Failed to parse response from {}: {err}", self.url))
        })?;
        if parsed.id != request.id {
            return Err(RelayError::Protocol(format!(
                "response id {:?} does not match request id {:?}",
                parsed.id, request.id
            )));
        }
        Ok(parsed)
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        debug!(url = %self.url, method = %notification.method, "sending notification");
        self.post(&notification).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session_id.write().await.take();
        if let Some(session) = session {
            // Servers may not support explicit termination; 405 is allowed.
            if let Err(err) = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .send()
                .await
            {
                debug!(url = %self.url, error = %err, "session termination failed");
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio Transport (Async via tokio::process)
// ─────────────────────────────────────────────────────────────────────────────

struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Transport that communicates with an MCP server via stdio
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    pipes: Mutex<Option<Pipes>>,
    timeout: Duration,
}

impl StdioTransport {
    /// Create a new stdio transport by launching a subprocess
    pub fn new(command: &str, args: &[&str], timeout: Duration) -> Result<Self> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        Self::spawn(command, &args, &HashMap::new(), timeout)
    }

    pub fn from_config(cfg: &StdioServerConfig) -> Result<Self> {
        Self::spawn(
            &cfg.command,
            &cfg.args,
            &cfg.env,
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            RelayError::Transport(format!("Failed to spawn MCP server `{command}`: {err}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::Transport("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Transport("MCP server stdout not available".into()))?;

        info!(command, pid = child.id(), "spawned MCP server");

        Ok(Self {
            child: Mutex::new(Some(child)),
            pipes: Mutex::new(Some(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
            })),
            timeout,
        })
    }

    async fn write_line(stdin: &mut ChildStdin, message: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| RelayError::Transport(format!("Failed to write to MCP server: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| RelayError::Transport(format!("Failed to flush: {err}")))
    }

    async fn read_response(
        stdout: &mut BufReader<ChildStdout>,
        id: Option<&RequestId>,
    ) -> Result<JsonRpcResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = stdout.read_line(&mut line).await.map_err(|err| {
                RelayError::Transport(format!("Failed to read from MCP server: {err}"))
            })?;
            if read == 0 {
                return Err(RelayError::Transport("MCP server closed stdout".into()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(response) = match_response(trimmed, id) {
                return Ok(response);
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut guard = self.pipes.lock().await;
        let pipes = guard
            .as_mut()
            .ok_or_else(|| RelayError::Transport("MCP server connection is closed".into()))?;

        debug!(method = %request.method, "sending request over stdio");
        let exchange = async {
            Self::write_line(&mut pipes.stdin, &request).await?;
            Self::read_response(&mut pipes.stdout, request.id.as_ref()).await
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                RelayError::Transport(format!(
                    "MCP server did not answer `{}` within {:?}",
                    request.method, self.timeout
                ))
            })?
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        let mut guard = self.pipes.lock().await;
        let pipes = guard
            .as_mut()
            .ok_or_else(|| RelayError::Transport("MCP server connection is closed".into()))?;
        Self::write_line(&mut pipes.stdin, &notification).await
    }

    async fn close(&self) -> Result<()> {
        // Dropping stdin lets a well-behaved server exit on EOF before it is killed.
        self.pipes.lock().await.take();

        let mut child_guard = self.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            if child.try_wait()?.is_none() {
                child.kill().await.map_err(|err| {
                    RelayError::Transport(format!("Failed to kill MCP server: {err}"))
                })?;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

/// MCP client for connecting to MCP servers
pub struct McpClient<T: McpTransport> {
    transport: T,
    next_id: AtomicU64,
    server_info: Option<ServerInfo>,
    capabilities: Option<ServerCapabilities>,
    protocol_version: Option<String>,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            server_info: None,
            capabilities: None,
            protocol_version: None,
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .transport
            .send(JsonRpcRequest::new(id, method, params))
            .await?;
        response.into_result()
    }

    /// Perform the initialize handshake. Subsequent calls return the cached server info.
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.server_info.is_none() {
            let raw = self
                .request(
                    "initialize",
                    Some(json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": {
                            "name": env!("CARGO_PKG_NAME"),
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    })),
                )
                .await?;
            let result: InitializeResult = serde_json::from_value(raw).map_err(|err| {
                RelayError::Protocol(format!("Failed to parse initialize result: {err}"))
            })?;

            self.transport
                .notify(JsonRpcRequest::notification("notifications/initialized", None))
                .await?;

            info!(
                server = %result.server_info.name,
                protocol = %result.protocol_version,
                "MCP server initialized"
            );
            self.protocol_version = Some(result.protocol_version);
            self.capabilities = Some(result.capabilities);
            self.server_info = Some(result.server_info);
        }

        self.server_info
            .as_ref()
            .ok_or_else(|| RelayError::Protocol("Server info not available".into()))
    }

    /// List available tools, following pagination cursors.
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        self.initialize().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let raw = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(raw).map_err(|err| {
                RelayError::Protocol(format!("Failed to parse tools/list result: {err}"))
            })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "tools/list cursor repeated, stopping pagination");
                    break;
                }
                None => break,
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.initialize().await?;

        let raw = self
            .request(
                "tools/call",
                Some(json!({
                    "name": name,
                    "arguments": arguments
                })),
            )
            .await?;
        serde_json::from_value(raw).map_err(|err| {
            RelayError::Protocol(format!("Failed to parse tools/call result: {err}"))
        })
    }

    pub async fn ping(&self) -> Result<()> {
        self.request("ping", None).await.map(|_| ())
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.is_some()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Tools Integration
// ─────────────────────────────────────────────────────────────────────────────

/// Registers the tools of one MCP server into a [`ToolRegistry`].
pub struct McpTools<T: McpTransport + 'static> {
    client: Arc<Mutex<McpClient<T>>>,
    tool_prefix: Option<String>,
}

impl<T: McpTransport + 'static> McpTools<T> {
    pub fn new(client: McpClient<T>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            tool_prefix: None,
        }
    }

    /// Set a prefix for all tool names
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    pub fn client(&self) -> Arc<Mutex<McpClient<T>>> {
        Arc::clone(&self.client)
    }

    /// Discover the server's tools and register them; returns how many were added.
    pub async fn register_tools(&self, registry: &mut ToolRegistry) -> Result<usize> {
        let definitions = self.client.lock().await.list_tools().await?;

        let mut count = 0;
        for definition in definitions {
            let name = match &self.tool_prefix {
                Some(prefix) => format!("{prefix}_{}", definition.name),
                None => definition.name.clone(),
            };
            let input_schema = InputSchema::from_json_schema(&name, &definition.input_schema)?;
            let description = definition
                .description
                .unwrap_or_else(|| format!("MCP tool: {}", definition.name));

            registry.register(RemoteTool {
                name,
                description,
                input_schema,
                remote_name: definition.name,
                client: Arc::clone(&self.client),
            })?;
            count += 1;
        }
        Ok(count)
    }
}

/// A tool that lives on an MCP server.
struct RemoteTool<T: McpTransport + 'static> {
    name: String,
    description: String,
    input_schema: InputSchema,
    remote_name: String,
    client: Arc<Mutex<McpClient<T>>>,
}

#[async_trait]
impl<T: McpTransport + 'static> Tool for RemoteTool<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> InputSchema {
        self.input_schema.clone()
    }

    async fn call(&self, arguments: Value) -> Result<ToolCallResult> {
        let arguments = match arguments {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Object(Map::new()),
            other => {
                return Err(RelayError::InvalidArguments {
                    name: self.name.clone(),
                    reason: format!("expected an object, got {other}"),
                })
            }
        };

        let mut client = self.client.lock().await;
        let result = client.call_tool(&self.remote_name, arguments).await?;
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notification_omits_id() {
        let json = serde_json::to_string(&JsonRpcRequest::notification(
            "notifications/initialized",
            None,
        ))
        .unwrap();
        assert_eq!(
            json,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
    }

    #[test]
    fn rpc_error_becomes_relay_error() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.id, Some(RequestId::Number(3)));
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, RelayError::Rpc { code: -32601, .. }));
    }

    #[test]
    fn server_request_is_not_a_response() {
        let raw = r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#;
        let parsed: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(!parsed.is_response());
        assert!(match_response(raw, Some(&RequestId::String("srv-1".into()))).is_none());
    }

    #[test]
    fn parses_fastmcp_tool_definition() {
        let raw = r#"{
            "name": "get_weather",
            "description": "Get the weather location",
            "inputSchema": {
                "properties": {"location": {"title": "Location", "type": "string"}},
                "required": ["location"],
                "title": "get_weatherArguments",
                "type": "object"
            }
        }"#;
        let tool: McpToolDefinition = serde_json::from_str(raw).unwrap();
        let schema = InputSchema::from_json_schema(&tool.name, &tool.input_schema).unwrap();
        assert!(schema.is_required("location"));
    }

    #[test]
    fn unknown_content_types_are_tolerated() {
        let raw = r#"{"content":[{"type":"text","text":"hi"},{"type":"audio","data":"AA=="}],"isError":false}"#;
        let result: CallToolResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.text(), "hi\n[unsupported content]");
    }

    #[test]
    fn error_results_map_to_failed_tool_calls() {
        let result = CallToolResult {
            content: vec![ContentItem::Text {
                text: "boom".into(),
            }],
            is_error: true,
        };
        let converted: ToolCallResult = result.into();
        assert_eq!(converted.error.as_deref(), Some("boom"));
    }

    #[test]
    fn drains_complete_sse_events_only() {
        let mut buffer =
            b"event: message\r\ndata: {\"a\":1}\r\n\r\n: keep-alive\n\ndata: {\"b\":".to_vec();
        let events = drain_sse_events(&mut buffer);
        assert_eq!(events, vec![r#"{"a":1}"#.to_string()]);
        assert_eq!(buffer, b"data: {\"b\":");

        buffer.extend_from_slice(b"2}\n\n");
        assert_eq!(drain_sse_events(&mut buffer), vec![r#"{"b":2}"#.to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn invalid_utf8_events_are_skipped() {
        let mut buffer = b"data: \xff\xfe\n\ndata: {}\n\n".to_vec();
        assert_eq!(drain_sse_events(&mut buffer), vec!["{}".to_string()]);
    }

    #[tokio::test]
    async fn characters_split_across_chunks_survive() {
        let event = "data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"content\":\
            [{\"type\":\"text\",\"text\":\"Reykjavík\"}]}}\n\n";
        let bytes = event.as_bytes();
        // Split between the two bytes of `í`.
        let split = event.find('í').unwrap() + 1;
        let chunks = vec![
            Ok::<_, std::convert::Infallible>(bytes[..split].to_vec()),
            Ok(bytes[split..].to_vec()),
        ];

        let id = RequestId::Number(7);
        let response = next_event_response(futures::stream::iter(chunks), Some(&id))
            .await
            .unwrap()
            .unwrap();
        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.text(), "Reykjavík");
    }

    #[tokio::test]
    async fn event_stream_without_a_match_yields_nothing() {
        let chunks = vec![Ok::<_, std::convert::Infallible>(
            b"data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}".to_vec(),
        )];
        let id = RequestId::Number(2);
        let found = next_event_response(futures::stream::iter(chunks), Some(&id))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    /// Answers every request from a scripted table and counts traffic.
    struct ScriptedTransport {
        sent: AtomicUsize,
        notified: AtomicUsize,
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let cursor = request
                .params
                .as_ref()
                .and_then(|p| p.get("cursor"))
                .and_then(Value::as_str);
            let result = match (request.method.as_str(), cursor) {
                ("initialize", _) => json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "1.0"}
                }),
                ("tools/list", None) => json!({
                    "tools": [{"name": "a", "inputSchema": {"type": "object"}}],
                    "nextCursor": "page-2"
                }),
                ("tools/list", Some(_)) => json!({
                    "tools": [{
                        "name": "b",
                        "description": "second",
                        "inputSchema": {"type": "object"}
                    }]
                }),
                ("tools/call", _) => json!({"content": [{"type": "text", "text": "done"}]}),
                (other, _) => {
                    return Ok(JsonRpcResponse::failure(
                        request.id,
                        JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, other),
                    ))
                }
            };
            Ok(JsonRpcResponse::success(request.id, result))
        }

        async fn notify(&self, _notification: JsonRpcRequest) -> Result<()> {
            self.notified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn scripted() -> ScriptedTransport {
        ScriptedTransport {
            sent: AtomicUsize::new(0),
            notified: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn list_tools_initializes_once_and_follows_cursor() {
        let mut client = McpClient::new(scripted());
        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(client.is_initialized());
        assert_eq!(client.server_info().unwrap().name, "scripted");

        client.list_tools().await.unwrap();
        assert_eq!(client.transport.notified.load(Ordering::SeqCst), 1);
        // initialize + 2 pages + 2 pages
        assert_eq!(client.transport.sent.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn registers_prefixed_remote_tools() {
        let tools = McpTools::new(McpClient::new(scripted())).with_prefix("srv");
        let mut registry = ToolRegistry::new();
        assert_eq!(tools.register_tools(&mut registry).await.unwrap(), 2);
        assert_eq!(registry.names(), vec!["srv_a".to_string(), "srv_b".to_string()]);

        let result = registry.call("srv_a", json!({})).await.unwrap();
        assert_eq!(result, ToolCallResult::text("done"));

        let err = registry.call("srv_b", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn ping_surfaces_rpc_errors() {
        let client = McpClient::new(scripted());
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RelayError::Rpc { code: JsonRpcError::METHOD_NOT_FOUND, .. }));
    }

    /// Pages `tools/list` as start -> A -> B -> A forever.
    struct CyclingCursors {
        pages: AtomicUsize,
    }

    #[async_trait]
    impl McpTransport for CyclingCursors {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            let result = if request.method == "initialize" {
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": "cycling"}
                })
            } else {
                let page = self.pages.fetch_add(1, Ordering::SeqCst);
                let next = if page % 2 == 0 { "A" } else { "B" };
                json!({
                    "tools": [{"name": format!("t{page}"), "inputSchema": {"type": "object"}}],
                    "nextCursor": next
                })
            };
            Ok(JsonRpcResponse::success(request.id, result))
        }

        async fn notify(&self, _notification: JsonRpcRequest) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cursor_cycles_end_pagination() {
        let mut client = McpClient::new(CyclingCursors {
            pages: AtomicUsize::new(0),
        });
        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["t0", "t1", "t2"]);
        assert_eq!(client.transport.pages.load(Ordering::SeqCst), 3);
    }
}
