//! Per-request orchestration: tools, generation and formatting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info_span, Instrument};

use crate::config::BotConfig;
use crate::error::BotError;
use crate::format::to_slack_markup;
use crate::generation::{
    generate_text, stream_text_with_tools, GenerateTextResult, GenerationOptions, SegmentSink,
    DEFAULT_MAX_STEPS,
};
use crate::mcp::{DynamicToolLoader, LoadedTools};
use crate::provider::{create_provider, ModelProvider};
use crate::status::StatusSink;
use crate::tools::builtin::static_tools;
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::Tool;
use crate::types::{GenerationSettings, ModelMessage};

/// System instruction with the given date filled in.
pub fn system_prompt(today: NaiveDate) -> String {
    format!(
        "You are a Slack bot assistant. Keep your responses concise and to the point.\n\
         - Do not tag users.\n\
         - Current date is: {}\n\
         - Make sure to ALWAYS include sources in your final response if you use web search. \
         Put sources inline if possible.",
        today.format("%Y-%m-%d")
    )
}

/// Answers one conversation at a time; cheap to share across requests.
#[derive(Clone)]
pub struct Assistant {
    provider: Arc<dyn ModelProvider>,
    static_tools: Vec<Arc<dyn Tool>>,
    loader: DynamicToolLoader,
    settings: GenerationSettings,
    max_steps: usize,
    request_timeout: Option<Duration>,
}

impl Assistant {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        static_tools: Vec<Arc<dyn Tool>>,
        loader: DynamicToolLoader,
    ) -> Self {
        Self {
            provider,
            static_tools,
            loader,
            settings: GenerationSettings::default(),
            max_steps: DEFAULT_MAX_STEPS,
            request_timeout: None,
        }
    }

    /// Provider, static tools, discovery and limits from configuration.
    pub fn from_config(config: &BotConfig) -> Result<Self, BotError> {
        let provider: Arc<dyn ModelProvider> = Arc::from(create_provider(config)?);
        Ok(Self::new(
            provider,
            static_tools(config),
            DynamicToolLoader::from_config(config),
        )
        .with_settings(
            GenerationSettings::builder()
                .maybe_max_tokens(config.max_tokens)
                .build(),
        )
        .with_max_steps(config.max_steps)
        .with_request_timeout(config.request_timeout))
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn options(&self, status: StatusSink) -> GenerationOptions {
        let options = GenerationOptions::default()
            .with_max_steps(self.max_steps)
            .with_status(status);
        match self.request_timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }

    fn conversation(&self, history: Vec<ModelMessage>) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ModelMessage::system(system_prompt(Utc::now().date_naive())));
        messages.extend(history);
        messages
    }

    async fn tools(&self, options: &GenerationOptions) -> (ToolRegistry, LoadedTools) {
        let mut loaded = self.loader.load(&options.status, options.deadline).await;
        let mut registry = ToolRegistry::with_static(self.static_tools.iter().cloned());
        registry.merge_dynamic(std::mem::take(&mut loaded.tools));
        debug!(tools = ?registry.names(), "tool set ready");
        (registry, loaded)
    }

    /// Run the full loop and return Slack-formatted text.
    pub async fn respond(
        &self,
        history: Vec<ModelMessage>,
        status: StatusSink,
    ) -> Result<GenerateTextResult, BotError> {
        let options = self.options(status.clone());
        status.emit("is thinking...");

        let (registry, session) = self.tools(&options).await;
        let result = generate_text(
            self.provider.as_ref(),
            self.conversation(history),
            self.settings.clone(),
            &registry,
            &options,
        )
        .instrument(info_span!("generate", model = self.provider.model_id()))
        .await;
        session.close().await;

        let mut result = result?;
        result.text = to_slack_markup(&result.text);
        Ok(result)
    }

    /// Stream the reply to `sink` segment by segment, each Slack-formatted.
    pub async fn respond_streaming(
        &self,
        history: Vec<ModelMessage>,
        status: StatusSink,
        sink: &dyn SegmentSink,
    ) -> Result<GenerateTextResult, BotError> {
        let options = self.options(status.clone());
        status.emit("is thinking...");

        let (registry, session) = self.tools(&options).await;
        let formatting = FormattingSink { inner: sink };
        let result = stream_text_with_tools(
            self.provider.as_ref(),
            self.conversation(history),
            self.settings.clone(),
            &registry,
            &options,
            &formatting,
        )
        .instrument(info_span!("generate_stream", model = self.provider.model_id()))
        .await;
        session.close().await;

        let mut result = result?;
        result.text = to_slack_markup(&result.text);
        Ok(result)
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("model", &self.provider.model_id())
            .field("static_tools", &self.static_tools.len())
            .field("loader", &self.loader)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

struct FormattingSink<'a> {
    inner: &'a dyn SegmentSink,
}

#[async_trait]
impl SegmentSink for FormattingSink<'_> {
    async fn send_segment(&self, segment: String) {
        self.inner.send_segment(to_slack_markup(&segment)).await;
    }
}
