//! Slack assistant bot.
//!
//! Forwards Slack messages to a chat-completion model, lets the model call
//! tools (weather, web search and actions discovered from an MCP server at
//! request time) over a bounded number of steps, and posts the formatted
//! answer back into the originating thread.
//!
//! # Quick Start
//!
//! ```no_run
//! use slackbot::assistant::Assistant;
//! use slackbot::config::BotConfig;
//! use slackbot::status::StatusSink;
//! use slackbot::types::ModelMessage;
//!
//! # async fn example() -> slackbot::error::Result<()> {
//! let config = BotConfig::from_env()?;
//! let assistant = Assistant::from_config(&config)?;
//! let reply = assistant
//!     .respond(vec![ModelMessage::user("Weather in Oslo?")], StatusSink::none())
//!     .await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

pub mod assistant;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod generation;
pub mod mcp;
pub mod provider;
pub mod slack;
pub mod status;
pub mod tools;
pub mod types;
