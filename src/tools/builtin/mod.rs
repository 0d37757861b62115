//! Static tools available to every request.
//!
//! [`static_tools`] returns the fixed set in registration order:
//! `getWeather` then `searchWeb`.

pub mod search;
pub mod weather;

use std::sync::Arc;

use crate::config::BotConfig;
use crate::tools::tool::Tool;

pub use search::{search_tool, SEARCH_MAX_RESULTS, SNIPPET_MAX_CHARS};
pub use weather::weather_tool;

/// Build the static tool set from configuration.
pub fn static_tools(config: &BotConfig) -> Vec<Arc<dyn Tool>> {
    vec![
        weather_tool(config.open_meteo_base_url.clone()),
        search_tool(
            config.exa_api_key().map(str::to_string),
            config.exa_base_url.clone(),
        ),
    ]
}
