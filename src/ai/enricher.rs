//! Article enrichment through a single delimited prompt.
//!
//! The model answers with four sections, each wrapped in `===NAME===` and
//! `===END NAME===`. Parsing tolerates missing sections and missing
//! terminators.

use std::sync::Arc;

use crate::{
    ai::Generator,
    app::{context::RequestContext, errors::AppError},
    models::AiFields,
    semantic::preprocess::truncate_with_suffix,
};

/// Characters of demo text sent for a summary
const DEMO_SUMMARY_CHARS: usize = 2000;

const SECTION_MARKDOWN: &str = "MARKDOWN";
const SECTION_SUMMARY: &str = "SUMMARY";
const SECTION_EXCERPT: &str = "EXCERPT";
const SECTION_TAGS: &str = "TAGS";

pub struct Enricher {
    generator: Arc<dyn Generator>,
    window: usize,
}

impl Enricher {
    pub fn new(generator: Arc<dyn Generator>, window: usize) -> Self {
        Self { generator, window }
    }

    pub async fn enrich(&self, ctx: &RequestContext, content: &str) -> Result<AiFields, AppError> {
        let prompt = build_prompt(&truncate_with_suffix(content, self.window, "..."));
        let response = self.generator.generate(ctx, &prompt).await?;
        if response.trim().is_empty() {
            return Err(AppError::AI("empty response from model".to_string()));
        }

        Ok(parse_sections(&response))
    }

    /// Summary of the first characters of `content`, for the extraction demo.
    pub async fn summarize(&self, ctx: &RequestContext, content: &str) -> Result<String, AppError> {
        let text = truncate_with_suffix(content, DEMO_SUMMARY_CHARS, "...");
        let response = self.generator.generate(ctx, &build_prompt(&text)).await?;
        Ok(extract_section(&response, SECTION_SUMMARY))
    }
}

pub fn build_prompt(content: &str) -> String {
    format!(
        r#"You are an expert at turning article text into clean, well-structured Markdown and at describing articles concisely. Process the article below and return FOUR outputs using exactly this structure:

==={SECTION_MARKDOWN}===
[The article rewritten as clean Markdown with headings, lists and paragraphs. Drop navigation, ads and boilerplate.]
===END {SECTION_MARKDOWN}===

==={SECTION_SUMMARY}===
[A summary of 2-3 sentences, under 200 words.]
===END {SECTION_SUMMARY}===

==={SECTION_EXCERPT}===
[One representative paragraph taken verbatim from the article.]
===END {SECTION_EXCERPT}===

==={SECTION_TAGS}===
[5-8 lowercase tags separated by commas, e.g. rust, databases, performance]
===END {SECTION_TAGS}===

Article:
{content}"#
    )
}

pub fn parse_sections(response: &str) -> AiFields {
    AiFields {
        markdown: extract_section(response, SECTION_MARKDOWN),
        summary: extract_section(response, SECTION_SUMMARY),
        excerpt: extract_section(response, SECTION_EXCERPT),
        tags: normalize_tags(&extract_section(response, SECTION_TAGS)),
    }
}

/// Text between `===NAME===` and `===END NAME===`. A missing terminator ends
/// the section at the next `===` header or end of text.
fn extract_section(response: &str, name: &str) -> String {
    let start_marker = format!("==={name}===");
    let end_marker = format!("===END {name}===");

    let Some(start) = response.find(&start_marker) else {
        return String::new();
    };
    let rest = &response[start + start_marker.len()..];

    let end = rest
        .find(&end_marker)
        .or_else(|| rest.find("\n==="))
        .unwrap_or(rest.len());

    rest[..end].trim().to_string()
}

/// Lowercase, trim and deduplicate a comma-separated tag list.
pub fn normalize_tags(raw: &str) -> String {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',') {
        let tag = tag.trim().trim_matches(|c| c == '#' || c == '"').to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "===MARKDOWN===\n# Title\n\nBody text.\n===END MARKDOWN===\n\n===SUMMARY===\nA short summary.\n===END SUMMARY===\n\n===EXCERPT===\nBody text.\n===END EXCERPT===\n\n===TAGS===\nRust, Async , #Tokio, rust\n===END TAGS===\n";

    #[test]
    fn test_parses_all_sections() {
        let fields = parse_sections(RESPONSE);
        assert_eq!(fields.markdown, "# Title\n\nBody text.");
        assert_eq!(fields.summary, "A short summary.");
        assert_eq!(fields.excerpt, "Body text.");
        assert_eq!(fields.tags, "rust,async,tokio");
    }

    #[test]
    fn test_missing_section_is_empty() {
        let fields = parse_sections("===SUMMARY===\nOnly a summary\n===END SUMMARY===");
        assert_eq!(fields.summary, "Only a summary");
        assert_eq!(fields.markdown, "");
        assert_eq!(fields.excerpt, "");
        assert_eq!(fields.tags, "");
    }

    #[test]
    fn test_missing_terminator_stops_at_next_header() {
        let fields = parse_sections("===SUMMARY===\nCut short\n===TAGS===\na, b\n");
        assert_eq!(fields.summary, "Cut short");
        assert_eq!(fields.tags, "a,b");
    }

    #[test]
    fn test_prompt_contains_markers_and_content() {
        let prompt = build_prompt("article body");
        for marker in ["===MARKDOWN===", "===END SUMMARY===", "===EXCERPT===", "===END TAGS==="] {
            assert!(prompt.contains(marker), "{marker}");
        }
        assert!(prompt.ends_with("article body"));
    }
}
