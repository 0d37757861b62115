//! Markdown to Slack mrkdwn conversion.

use std::sync::LazyLock;

use regex::Regex;

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").expect("link pattern must compile"));

/// Rewrite `[label](url)` as `<url|label>` and `**bold**` as `*bold*`.
///
/// Text without either construct is returned unchanged.
pub fn to_slack_markup(text: &str) -> String {
    LINK_PATTERN
        .replace_all(text, "<$2|$1>")
        .replace("**", "*")
}
