//! OpenAI Chat Completions API provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::BotError;
use crate::types::*;

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error};
use super::{ModelProvider, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_openai)
            .collect::<Vec<_>>();

        let mut obj = serde_json::Map::new();
        obj.insert("model".into(), self.model.clone().into());
        obj.insert("messages".into(), messages.into());
        obj.insert("stream".into(), stream.into());

        if stream {
            obj.insert(
                "stream_options".into(),
                serde_json::json!({ "include_usage": true }),
            );
        }
        if let Some(max) = request.settings.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            obj.insert("top_p".into(), top_p.into());
        }
        if let Some(seed) = request.settings.seed {
            obj.insert("seed".into(), seed.into());
        }
        if let Some(ref user) = request.settings.user {
            obj.insert("user".into(), user.clone().into());
        }

        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        serde_json::Value::Object(obj)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, BotError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, request: &ProviderRequest) -> Result<ProviderResponse, BotError> {
        let body = self.build_request_body(request, false);
        debug!(model = %self.model, "OpenAI generate_text");

        let data: OpenAiChatResponse = self.post(&body).await?.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BotError::api(200, "No choices in OpenAI response"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| AgentToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: parse_arguments(tc.function.arguments),
            })
            .collect();

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            usage: data.usage.map(Usage::from).unwrap_or_default(),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .and_then(FinishReason::from_provider),
        })
    }

    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, BotError>>, BotError> {
        let body = self.build_request_body(request, true);
        debug!(model = %self.model, "OpenAI stream_text");

        let byte_stream = self.post(&body).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut finish_reason = None;
            let mut usage = None;
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(BotError::Network(e));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    let parsed = match serde_json::from_str::<OpenAiStreamChunk>(data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            trace!(error = %e, "skipping unparseable stream chunk");
                            continue;
                        }
                    };

                    if let Some(u) = parsed.usage {
                        usage = Some(Usage::from(u));
                    }
                    for choice in parsed.choices {
                        if let Some(reason) = choice.finish_reason.as_deref() {
                            finish_reason = FinishReason::from_provider(reason);
                        }
                        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                            yield Ok(TextStreamDelta::text(text));
                        }
                        for tc in choice.delta.tool_calls.unwrap_or_default() {
                            let function = tc.function.unwrap_or_default();
                            yield Ok(TextStreamDelta::tool_call(ToolCallDelta {
                                index: tc.index,
                                id: tc.id,
                                name: function.name,
                                arguments: function.arguments.unwrap_or_default(),
                            }));
                        }
                    }
                }
            }

            yield Ok(TextStreamDelta::done(finish_reason, usage));
        };

        Ok(Box::pin(stream))
    }
}

/// Arguments arrive as a JSON string; keep the raw string if it does not parse.
pub(crate) fn parse_arguments(raw: String) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
}

fn message_to_openai(msg: &ModelMessage) -> serde_json::Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if let Some(tr) = msg.tool_result_part() {
        let content = match &tr.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": tr.tool_call_id,
            "content": content,
        });
    }

    let tool_calls = msg.tool_calls();
    if !tool_calls.is_empty() {
        let tc_json: Vec<serde_json::Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        let text = msg.text();
        return serde_json::json!({
            "role": role,
            "content": if text.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(text) },
            "tool_calls": tc_json,
        });
    }

    let mut value = serde_json::json!({ "role": role, "content": msg.text() });
    if let Some(ref name) = msg.name {
        value["name"] = serde_json::Value::String(name.clone());
    }
    value
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("gpt-4o", "sk-test".into(), Some("http://localhost/v1/".into()))
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(provider().base_url, "http://localhost/v1");
    }

    #[test]
    fn request_body_includes_tools_as_functions() {
        let request = ProviderRequest {
            messages: vec![ModelMessage::user("hi")],
            settings: GenerationSettings::default(),
            tools: Some(vec![ToolDefinition {
                name: "getWeather".into(),
                description: "weather".into(),
                parameters: json!({"type": "object"}),
            }]),
        };

        let body = provider().build_request_body(&request, false);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "getWeather");
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn assistant_tool_call_and_tool_result_messages_use_openai_shape() {
        let call = AgentToolCall {
            id: "call_1".into(),
            name: "getWeather".into(),
            arguments: json!({"city": "Paris"}),
        };
        let assistant = message_to_openai(&ModelMessage::assistant_tool_calls("", &[call]));
        assert_eq!(assistant["content"], serde_json::Value::Null);
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"city":"Paris"}"#
        );

        let tool = message_to_openai(&ModelMessage::tool_result(
            "call_1",
            json!({"temperature": 20}),
            false,
        ));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert_eq!(tool["content"], r#"{"temperature":20}"#);
    }

    #[test]
    fn parse_arguments_keeps_unparseable_input_as_string() {
        assert_eq!(parse_arguments(String::new()), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#.into()), json!({"a": 1}));
        assert_eq!(parse_arguments("{oops".into()), json!("{oops"));
    }
}
