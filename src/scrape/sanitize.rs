//! Strict HTML stripping for every user-visible text field.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{node::Node, Html};

/// Elements whose contents are dropped entirely, not just unwrapped
const ACTIVE_TAGS: &[&str] = &["script", "style", "noscript", "template", "iframe", "object"];

static COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Failed to compile comment regex"));

static ACTIVE_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template)\b[^>]*>.*?</(script|style|noscript|template)\s*>")
        .expect("Failed to compile active block regex")
});

static TRACKING_ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s(on[a-z]+|data-[a-z0-9_-]+|style)\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("Failed to compile attribute regex")
});

/// Remove all markup and return the text content with entities decoded.
pub fn strip_tags(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return input.to_string();
    }

    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());

    for node in fragment.tree.root().descendants() {
        if let Node::Text(text) = node.value() {
            let inside_active = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|el| ACTIVE_TAGS.contains(&el.name()))
                    .unwrap_or(false)
            });
            if !inside_active {
                out.push_str(text);
            }
        }
    }

    out
}

/// Strip markup, replace tabs and newlines with spaces and collapse whitespace.
pub fn clean_text(input: &str) -> String {
    let stripped = strip_tags(input);
    stripped
        .replace(['\t', '\n', '\r'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Like `clean_text` but keeps paragraph breaks (blank lines) intact.
pub fn clean_body(input: &str) -> String {
    let stripped = strip_tags(input);
    stripped
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Drop scripts, styles, comments and inline handlers from client-supplied
/// HTML before it is reduced to text or shown to a model.
pub fn clean_html_for_llm(html: &str) -> String {
    let without_comments = COMMENT_REGEX.replace_all(html, "");
    let without_active = ACTIVE_BLOCK_REGEX.replace_all(&without_comments, "");
    TRACKING_ATTR_REGEX
        .replace_all(&without_active, "")
        .into_owned()
}
