//! Model provider trait and implementations.

pub mod http;
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::BotConfig;
use crate::error::BotError;
use crate::types::{
    AgentToolCall, FinishReason, GenerationSettings, ModelMessage, TextStreamDelta, Usage,
};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Usage,
    pub tool_calls: Vec<AgentToolCall>,
    pub finish_reason: Option<FinishReason>,
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Generate text (non-streaming).
    async fn generate_text(&self, request: &ProviderRequest)
        -> Result<ProviderResponse, BotError>;

    /// Generate text (streaming).
    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, BotError>>, BotError>;
}

/// Create the configured model provider.
pub fn create_provider(config: &BotConfig) -> Result<Box<dyn ModelProvider>, BotError> {
    let api_key = config.openai_api_key()?;
    Ok(Box::new(openai::OpenAiProvider::new(
        config.model.clone(),
        api_key.to_string(),
        config.openai_base_url.clone(),
    )))
}
