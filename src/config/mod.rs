//! Configuration system (layered: CLI flags > env > `.env` file).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use strum::{Display, EnumString};
use tracing::warn;

use crate::error::BotError;

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 55;
const DEFAULT_MAX_STEPS: usize = 10;

/// How replies are delivered to Slack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ResponseMode {
    /// Run the whole loop, then post one formatted message.
    #[default]
    Complete,
    /// Post each text segment as soon as it is decoded from the model stream.
    Stream,
}

/// Runtime configuration for the bot.
#[derive(Clone)]
pub struct BotConfig {
    slack_bot_token: Option<SecretString>,
    slack_signing_secret: Option<SecretString>,
    openai_api_key: Option<SecretString>,
    pub openai_base_url: Option<String>,
    pub model: String,
    pub mcp_url: Option<Url>,
    exa_api_key: Option<SecretString>,
    pub exa_base_url: Option<String>,
    pub open_meteo_base_url: Option<String>,
    pub response_mode: ResponseMode,
    pub discovery_timeout: Duration,
    pub request_timeout: Duration,
    pub max_steps: usize,
    /// Completion token cap per model call.
    pub max_tokens: Option<u32>,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(secret: &Option<SecretString>) -> Option<&'static str> {
            secret.as_ref().map(|_| "[REDACTED]")
        }

        f.debug_struct("BotConfig")
            .field("slack_bot_token", &redact(&self.slack_bot_token))
            .field("slack_signing_secret", &redact(&self.slack_signing_secret))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("model", &self.model)
            .field("mcp_url", &self.mcp_url.as_ref().map(|u| u.host_str().unwrap_or("")))
            .field("exa_api_key", &redact(&self.exa_api_key))
            .field("response_mode", &self.response_mode)
            .field("discovery_timeout", &self.discovery_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_steps", &self.max_steps)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            slack_bot_token: None,
            slack_signing_secret: None,
            openai_api_key: None,
            openai_base_url: None,
            model: DEFAULT_MODEL.to_string(),
            mcp_url: None,
            exa_api_key: None,
            exa_base_url: None,
            open_meteo_base_url: None,
            response_mode: ResponseMode::Complete,
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_steps: DEFAULT_MAX_STEPS,
            max_tokens: None,
        }
    }
}

impl BotConfig {
    /// Load from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, BotError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str| get(key).map(SecretString::from);

        let mut config = Self {
            slack_bot_token: secret("SLACK_BOT_TOKEN"),
            slack_signing_secret: secret("SLACK_SIGNING_SECRET"),
            openai_api_key: secret("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            exa_api_key: secret("EXA_API_KEY"),
            exa_base_url: get("EXA_BASE_URL"),
            open_meteo_base_url: get("OPEN_METEO_BASE_URL"),
            ..Self::default()
        };

        if let Some(model) = get("BOT_MODEL") {
            config.model = model;
        }

        // An unparseable URL disables discovery rather than failing startup.
        config.mcp_url = get("ZAPIER_MCP_URL")
            .or_else(|| get("MCP_SERVER_URL"))
            .and_then(|raw| match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(error = %e, "ignoring invalid MCP server URL");
                    None
                }
            });

        if let Some(mode) = get("BOT_RESPONSE_MODE") {
            config.response_mode = ResponseMode::from_str(&mode).map_err(|_| {
                BotError::Configuration(format!(
                    "BOT_RESPONSE_MODE must be 'complete' or 'stream', got '{mode}'"
                ))
            })?;
        }
        if let Some(secs) = parse_number::<u64>(&get, "BOT_DISCOVERY_TIMEOUT_SECS")? {
            config.discovery_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number::<u64>(&get, "BOT_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(steps) = parse_number::<usize>(&get, "BOT_MAX_STEPS")? {
            if steps == 0 {
                return Err(BotError::Configuration(
                    "BOT_MAX_STEPS must be at least 1".into(),
                ));
            }
            config.max_steps = steps;
        }
        config.max_tokens = parse_number::<u32>(&get, "BOT_MAX_TOKENS")?;

        if let Some(ref token) = config.slack_bot_token {
            if !token.expose_secret().starts_with("xoxb-") {
                warn!("Bot token doesn't start with 'xoxb-', this may be incorrect");
            }
        }

        Ok(config)
    }

    pub fn set_slack_bot_token(&mut self, token: impl Into<String>) {
        self.slack_bot_token = Some(SecretString::from(token.into()));
    }

    pub fn set_slack_signing_secret(&mut self, secret: impl Into<String>) {
        self.slack_signing_secret = Some(SecretString::from(secret.into()));
    }

    pub fn set_openai_api_key(&mut self, key: impl Into<String>) {
        self.openai_api_key = Some(SecretString::from(key.into()));
    }

    pub fn set_exa_api_key(&mut self, key: impl Into<String>) {
        self.exa_api_key = Some(SecretString::from(key.into()));
    }

    /// Slack bot token, required by the event server.
    pub fn slack_bot_token(&self) -> Result<&str, BotError> {
        required(&self.slack_bot_token, "SLACK_BOT_TOKEN")
    }

    /// Slack signing secret, required by the event server.
    pub fn slack_signing_secret(&self) -> Result<&str, BotError> {
        required(&self.slack_signing_secret, "SLACK_SIGNING_SECRET")
    }

    /// Model provider API key.
    pub fn openai_api_key(&self) -> Result<&str, BotError> {
        self.openai_api_key
            .as_ref()
            .map(|s| s.expose_secret())
            .ok_or_else(|| BotError::Authentication("Missing OPENAI_API_KEY".into()))
    }

    /// Search API key, if configured.
    pub fn exa_api_key(&self) -> Option<&str> {
        self.exa_api_key.as_ref().map(|s| s.expose_secret())
    }
}

fn required<'a>(secret: &'a Option<SecretString>, name: &str) -> Result<&'a str, BotError> {
    secret
        .as_ref()
        .map(|s| s.expose_secret())
        .ok_or_else(|| BotError::Configuration(format!("{name} not set")))
}

fn parse_number<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, BotError> {
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                BotError::Configuration(format!("{key} must be a non-negative integer, got '{raw}'"))
            })
        })
        .transpose()
}
