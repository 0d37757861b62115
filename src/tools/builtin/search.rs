//! `searchWeb`: live-crawled web search through Exa.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::BotError;
use crate::provider::http::shared_client;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

const TOOL_NAME: &str = "searchWeb";
const DEFAULT_BASE_URL: &str = "https://api.exa.ai";

/// Maximum results returned to the model.
pub const SEARCH_MAX_RESULTS: usize = 3;
/// Maximum snippet length, in characters.
pub const SNIPPET_MAX_CHARS: usize = 1000;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    text: Option<String>,
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((cutoff, _)) => &s[..cutoff],
        None => s,
    }
}

fn request_body(query: &str, domain: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "query": query,
        "numResults": SEARCH_MAX_RESULTS,
        "livecrawl": "always",
        "contents": { "text": true, "livecrawl": "always" },
    });
    if let Some(domain) = domain {
        body["includeDomains"] = serde_json::json!([domain]);
    }
    body
}

fn to_result(response: SearchResponse) -> serde_json::Value {
    let results: Vec<_> = response
        .results
        .into_iter()
        .take(SEARCH_MAX_RESULTS)
        .map(|hit| {
            serde_json::json!({
                "title": hit.title.unwrap_or_default(),
                "url": hit.url,
                "snippet": truncate_chars(hit.text.as_deref().unwrap_or(""), SNIPPET_MAX_CHARS),
            })
        })
        .collect();
    serde_json::json!({ "results": results })
}

/// Create the web search tool.
///
/// Without an API key the tool is still registered; calls fail with a
/// tool error the model can report.
pub fn search_tool(api_key: Option<String>, base_url: Option<String>) -> Arc<dyn Tool> {
    let api_key = api_key.map(SecretString::from);
    let endpoint = format!(
        "{}/search",
        base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    );

    Arc::new(AgentTool::new(
        TOOL_NAME,
        "Use this to search the web for information",
        AgentToolParameters::object()
            .string("query", "The search query", true)
            .nullable_string(
                "specificDomain",
                "A domain to search if the user specifies e.g. bbc.com. Should be only the domain name without the protocol",
            )
            .build(),
        move |args, ctx: ToolExecutionContext| {
            let api_key = api_key.clone();
            let endpoint = endpoint.clone();
            async move {
                let query = args.get_str("query")?.to_string();
                let domain = args.get_str_opt("specificDomain").map(str::to_string);

                ctx.status.emit(format!("Searching the web for \"{query}\"..."));

                let api_key = api_key
                    .ok_or_else(|| BotError::tool(TOOL_NAME, "EXA_API_KEY not set"))?;
                debug!(query = %query, domain = ?domain, "searching");

                let response = shared_client()
                    .post(&endpoint)
                    .header("x-api-key", api_key.expose_secret())
                    .json(&request_body(&query, domain.as_deref()))
                    .send()
                    .await
                    .map_err(|e| BotError::tool(TOOL_NAME, e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(BotError::tool(
                        TOOL_NAME,
                        format!("search request failed ({}): {body}", status.as_u16()),
                    ));
                }

                let parsed: SearchResponse = response
                    .json()
                    .await
                    .map_err(|e| BotError::tool(TOOL_NAME, format!("malformed search response: {e}")))?;

                Ok(to_result(parsed))
            }
        },
    ))
}
