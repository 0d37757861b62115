//! Chat Completions provider against a mocked API.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use slackbot::error::BotError;
use slackbot::provider::openai::OpenAiProvider;
use slackbot::provider::{ModelProvider, ProviderRequest, ToolDefinition};
use slackbot::types::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> ProviderRequest {
    ProviderRequest {
        messages: vec![
            ModelMessage::system("be brief"),
            ModelMessage::user("weather in Oslo?"),
        ],
        settings: GenerationSettings::default(),
        tools: Some(vec![ToolDefinition {
            name: "getWeather".into(),
            description: "Get the current weather at a location".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }]),
    }
}

fn provider(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new("gpt-4o", "sk-test".into(), Some(format!("{}/v1", server.uri())))
}

#[tokio::test]
async fn generate_text_parses_tool_calls_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "getWeather",
                            "arguments": "{\"latitude\":59.91,\"longitude\":10.75,\"city\":\"Oslo\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 12, "total_tokens": 52}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server).generate_text(&request()).await.unwrap();

    assert_eq!(response.text, "");
    assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(response.usage.total_tokens, 52);
    assert_eq!(
        response.tool_calls,
        vec![AgentToolCall {
            id: "call_abc".into(),
            name: "getWeather".into(),
            arguments: json!({"latitude": 59.91, "longitude": 10.75, "city": "Oslo"}),
        }]
    );
}

#[tokio::test]
async fn http_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = provider(&server).generate_text(&request()).await.unwrap_err();
    assert!(matches!(err, BotError::Authentication(_)));
}

#[tokio::test]
async fn stream_text_yields_text_and_tool_call_deltas() {
    let server = MockServer::start().await;
    let sse = [
        r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Checking"}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"content":" now."}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"searchWeb","arguments":"{\"query\":"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"oslo\"}"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        r#"data: {"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7,"total_tokens":12}}"#,
        "data: [DONE]",
    ]
    .join("\n\n")
        + "\n\n";

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "stream_options": {"include_usage": true}})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let stream = provider(&server).stream_text(&request()).await.unwrap();
    let deltas: Vec<TextStreamDelta> = stream.map(|d| d.unwrap()).collect().await;

    let text: String = deltas
        .iter()
        .filter(|d| d.event_type == StreamEventType::TextDelta)
        .map(|d| d.text.as_str())
        .collect();
    assert_eq!(text, "Checking now.");

    let args: String = deltas
        .iter()
        .filter_map(|d| d.tool_call.as_ref())
        .map(|tc| tc.arguments.as_str())
        .collect();
    assert_eq!(args, r#"{"query":"oslo"}"#);

    let done = deltas.last().unwrap();
    assert_eq!(done.event_type, StreamEventType::Done);
    assert_eq!(done.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(done.usage.as_ref().map(|u| u.total_tokens), Some(12));
}
