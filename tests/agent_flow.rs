mod common;

use std::io::Write;
use std::sync::Arc;

use mcp_relay::tools::{math_toolkit, weather_toolkit, FORECAST};
use mcp_relay::{Agent, GroqClient, RelayConfig, RelayError, StubModel, ToolRegistry};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn local_tools() -> ToolRegistry {
    let mut tools = math_toolkit().unwrap();
    tools.merge(weather_toolkit().unwrap()).unwrap();
    tools
}

fn completion(message: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": message, "finish_reason": "stop"}]
    }))
}

/// Calls `evaluate` first, then answers with whatever the tool returned.
fn groq_script(request: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    match messages.iter().find(|m| m["role"] == "tool") {
        None => completion(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_0",
                "type": "function",
                "function": {
                    "name": "evaluate",
                    "arguments": "{\"expression\":\"(3 + 5) * 12\"}"
                }
            }]
        })),
        Some(tool) => {
            let output = tool["content"].as_str().unwrap();
            completion(json!({
                "role": "assistant",
                "content": format!("<think>12 * 8</think>The answer is {output}.")
            }))
        }
    }
}

fn write_config(base_url: &str, api_key: Option<&str>) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[model]").unwrap();
    writeln!(file, "base_url = \"{base_url}\"").unwrap();
    if let Some(key) = api_key {
        writeln!(file, "api_key = \"{key}\"").unwrap();
    }
    file
}

#[tokio::test]
async fn groq_agent_answers_with_tool_output() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(groq_script)
        .expect(2)
        .mount(&server)
        .await;

    let file = write_config(&server.uri(), Some("test-key"));
    let config = RelayConfig::from_file(file.path()).unwrap();
    let model = Arc::new(GroqClient::from_config(&config.model).unwrap());
    assert_eq!(model.model(), "qwen-qwq-32b");

    let agent = Agent::new(model).with_tools(local_tools());
    let answer = agent.respond("What is (3 + 5) * 12 ?").await.unwrap();

    assert_eq!(answer, "The answer is 96.");
}

#[tokio::test]
async fn groq_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let file = write_config(&server.uri(), Some("test-key"));
    let config = RelayConfig::from_file(file.path()).unwrap();
    let agent = Agent::new(Arc::new(GroqClient::from_config(&config.model).unwrap()));

    let err = agent.respond("hi").await.unwrap_err();
    assert!(matches!(err, RelayError::LanguageModel(_)), "{err:?}");
}

#[tokio::test]
async fn stub_agent_answers_both_demo_questions() {
    let model = Arc::new(StubModel::new(vec![
        r#"{"action":"call_tool","name":"evaluate","arguments":{"expression":"(3 + 5) * 12"}}"#.into(),
        r#"{"action":"respond","content":"96"}"#.into(),
        r#"{"action":"call_tool","name":"get_weather","arguments":{"location":"New Jersey"}}"#.into(),
        json!({"action": "respond", "content": FORECAST}).to_string(),
    ]));
    let agent = Agent::new(model).with_tools(local_tools());

    let math = agent.run("What is (3 + 5) * 12 ?").await.unwrap();
    assert_eq!(math.answer, "96");

    let weather = agent.run("what is the weather in New Jersey?").await.unwrap();
    assert_eq!(weather.answer, FORECAST);
    let tool_output = weather
        .messages
        .iter()
        .find_map(|m| m.tool_result.as_ref())
        .unwrap();
    assert_eq!(tool_output.output, FORECAST);
}

#[cfg(feature = "server")]
#[tokio::test]
async fn stub_agent_uses_remote_weather_server() {
    use std::time::Duration;

    use mcp_relay::mcp::HttpTransport;
    use mcp_relay::{MultiServerClient, ToolServer};

    let server = ToolServer::new("weather", weather_toolkit().unwrap());
    let url = common::spawn_http_server(server).await;
    let mut client = MultiServerClient::new();
    client
        .add_server(
            "weather",
            Box::new(HttpTransport::new(&url, Duration::from_secs(5)).unwrap()),
            None,
        )
        .await
        .unwrap();

    let model = Arc::new(StubModel::new(vec![
        r#"{"action":"call_tool","name":"get_weather","arguments":{"location":"New Jersey"}}"#.into(),
        r#"{"action":"respond","content":"rainy"}"#.into(),
    ]));
    let agent = Agent::new(model).with_tools(client.registry().clone());
    let run = agent.run("what is the weather in New Jersey?").await.unwrap();

    assert_eq!(run.answer, "rainy");
    assert_eq!(run.messages[2].content, FORECAST);
    client.close().await.unwrap();
}
