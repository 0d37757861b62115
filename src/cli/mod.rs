//! Command-line flags for the bot server.

use clap::Parser;

use crate::config::{BotConfig, ResponseMode};

/// Slack assistant bot server
#[derive(Parser, Debug)]
#[command(name = "slackbot", version, about = "Slack assistant bot with tool-augmented replies")]
pub struct Cli {
    /// Listen address
    #[arg(long, env = "BOT_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Model id (overrides BOT_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Reply delivery: complete or stream (overrides BOT_RESPONSE_MODE)
    #[arg(long)]
    pub mode: Option<ResponseMode>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Apply flag overrides on top of the environment config.
    pub fn apply(&self, config: &mut BotConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(mode) = self.mode {
            config.response_mode = mode;
        }
    }
}
