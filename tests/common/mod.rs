#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use wiremock::{Request, ResponseTemplate};

/// Serves `server` on an ephemeral port and returns its `/mcp` URL.
#[cfg(feature = "server")]
pub async fn spawn_http_server(server: mcp_relay::ToolServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(std::sync::Arc::new(server).serve_listener(listener));
    format!("http://{addr}/mcp")
}

/// A listener that accepts connections and never writes a byte.
pub async fn spawn_silent_listener() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("http://{addr}/mcp")
}

/// Minimal MCP endpoint for wiremock: one `slow_echo` tool whose calls take `call_delay`.
pub fn scripted_mcp(
    call_delay: Duration,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    move |request: &Request| {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let result = match body["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "scripted", "version": "0.0.1"}
            }),
            Some("tools/list") => json!({
                "tools": [{
                    "name": "slow_echo",
                    "description": "Echoes its input eventually",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"]
                    }
                }]
            }),
            Some("tools/call") => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [{"type": "text", "text": "echo"}], "isError": false}
                });
                return ResponseTemplate::new(200)
                    .set_body_json(reply)
                    .set_delay(call_delay);
            }
            _ => json!({}),
        };
        let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
        ResponseTemplate::new(200).set_body_json(reply)
    }
}
