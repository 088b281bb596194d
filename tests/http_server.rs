#![cfg(feature = "server")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use mcp_relay::mcp::{HttpTransport, McpClient, McpTransport, SESSION_HEADER};
use mcp_relay::tools::{weather_toolkit, FORECAST};
use mcp_relay::{MultiServerClient, RelayError, ToolServer};
use serde_json::json;

async fn weather_url() -> String {
    common::spawn_http_server(ToolServer::new("weather", weather_toolkit().unwrap())).await
}

#[tokio::test]
async fn weather_tool_round_trips_over_http() {
    let url = weather_url().await;
    let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();

    let mut client = MultiServerClient::new();
    let count = client
        .add_server("weather", Box::new(transport), None)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let tools = client.list_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "get_weather");
    assert!(tools[0].input_schema.is_required("location"));

    for location in ["New Jersey", "", "Reykjavík"] {
        let result = client
            .invoke("get_weather", json!({ "location": location }))
            .await
            .unwrap();
        assert_eq!(result.as_text(), FORECAST);
    }

    let err = client.invoke("get_forecast", json!({})).await.unwrap_err();
    assert!(matches!(err, RelayError::UnknownTool(_)));

    client.close().await.unwrap();
}

#[tokio::test]
async fn session_id_is_issued_on_initialize() {
    let url = weather_url().await;
    let transport = Arc::new(HttpTransport::new(&url, Duration::from_secs(5)).unwrap());
    assert!(transport.session_id().await.is_none());

    let mut client = McpClient::new(transport.clone());
    let info = client.initialize().await.unwrap();
    assert_eq!(info.name, "weather");
    assert_eq!(client.protocol_version(), Some("2025-03-26"));

    let session = transport.session_id().await.unwrap();
    assert!(!session.is_empty());

    client.ping().await.unwrap();
    transport.close().await.unwrap();
    assert!(transport.session_id().await.is_none());
}

#[tokio::test]
async fn router_speaks_plain_http() {
    let url = weather_url().await;
    let http = reqwest::Client::new();

    let init = http
        .post(&url)
        .json(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}}
        }))
        .send()
        .await
        .unwrap();
    assert!(init.status().is_success());
    assert!(init.headers().contains_key(SESSION_HEADER));
    let body: serde_json::Value = init.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

    let notified = http
        .post(&url)
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(notified.status(), reqwest::StatusCode::ACCEPTED);

    let garbage = http.post(&url).body("{nope").send().await.unwrap();
    assert_eq!(garbage.status(), reqwest::StatusCode::BAD_REQUEST);

    let health = http
        .get(url.replace("/mcp", "/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");
}
