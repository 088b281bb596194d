//! Connects a tool-calling agent to Model Context Protocol tool servers.
//!
//! The crate provides:
//! - An MCP client over stdio and streamable HTTP (`mcp`), aggregated across
//!   several servers by `MultiServerClient`.
//! - A typed tool interface (`Tool`, `ToolRegistry`) with input schemas checked
//!   at registration.
//! - A small MCP server (`ToolServer`) with the bundled math and weather toolkits.
//! - An `Agent` that loops between a `LanguageModel` and the registered tools.

mod agent;
mod client;
mod config;
mod error;
mod llm;
pub mod mcp;
mod message;
mod server;
pub mod telemetry;
mod tool;
pub mod tools;

pub use agent::{Agent, AgentRun};
pub use client::MultiServerClient;
pub use config::{
    HttpServerConfig, ModelConfig, RelayConfig, ServerConfig, StdioServerConfig, API_KEY_ENV,
};
pub use error::{RelayError, Result};
pub use llm::{GroqClient, LanguageModel, ModelCompletion, StubModel, GROQ_BASE_URL};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use server::{ToolServer, SUPPORTED_PROTOCOL_VERSIONS};
pub use telemetry::{init_tracing, LogFormat};
pub use tool::{
    InputSchema, Param, ParamType, Tool, ToolCallRequest, ToolCallResult, ToolDescriptor,
    ToolRegistry,
};
