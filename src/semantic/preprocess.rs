//! Text preparation for embedding and prompt input.
//!
//! Truncation is a fixed policy shared by every call site:
//! 1. Documents longer than `DOCUMENT_MAX_CHARS` keep the first and last
//!    `DOCUMENT_EDGE_CHARS` characters joined by an ellipsis
//! 2. Queries are cut to `QUERY_MAX_CHARS`
//!
//! All lengths are counted in characters so UTF-8 sequences are never split.

/// Maximum document body length before head/tail truncation kicks in
pub const DOCUMENT_MAX_CHARS: usize = 2000;

/// Characters kept from each end of an over-long document
pub const DOCUMENT_EDGE_CHARS: usize = 1000;

/// Maximum query length for query-mode embeddings
pub const QUERY_MAX_CHARS: usize = 100;

/// Separator placed between the kept head and tail of a long document
pub const ELLIPSIS: &str = "…";

/// Body text for a document-mode embedding.
pub fn document_text(body: &str) -> String {
    let body = body.trim();
    let len = body.chars().count();
    if len <= DOCUMENT_MAX_CHARS {
        return body.to_string();
    }

    let head: String = body.chars().take(DOCUMENT_EDGE_CHARS).collect();
    let tail: String = body.chars().skip(len - DOCUMENT_EDGE_CHARS).collect();

    format!("{head}{ELLIPSIS}{tail}")
}

/// Query text for a query-mode embedding.
pub fn query_text(query: &str) -> String {
    query.trim().chars().take(QUERY_MAX_CHARS).collect()
}

/// Cut `content` to `max` characters and append `suffix` when anything was dropped.
pub fn truncate_with_suffix(content: &str, max: usize, suffix: &str) -> String {
    if content.chars().count() <= max {
        return content.to_string();
    }

    let truncated: String = content.chars().take(max).collect();
    format!("{truncated}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_document_is_untouched() {
        assert_eq!(document_text("  hello world  "), "hello world");
        let exact = "a".repeat(DOCUMENT_MAX_CHARS);
        assert_eq!(document_text(&exact), exact);
    }

    #[test]
    fn test_long_document_keeps_head_and_tail() {
        let body = format!("{}{}{}", "h".repeat(1000), "m".repeat(500), "t".repeat(1000));
        let text = document_text(&body);

        assert_eq!(text.chars().count(), 2001);
        assert!(text.starts_with(&"h".repeat(1000)));
        assert!(text.ends_with(&"t".repeat(1000)));
        assert!(text.contains(&format!("h{ELLIPSIS}t")));
        assert!(!text.contains('m'));
    }

    #[test]
    fn test_long_multibyte_document() {
        let body = "ж".repeat(2500);
        let text = document_text(&body);
        assert_eq!(text.chars().count(), 2001);
    }

    #[test]
    fn test_query_truncation() {
        let q = "q".repeat(250);
        assert_eq!(query_text(&q).chars().count(), QUERY_MAX_CHARS);
        assert_eq!(query_text(" rust async "), "rust async");
    }

    #[test]
    fn test_truncate_with_suffix() {
        assert_eq!(truncate_with_suffix("abcdef", 3, "…"), "abc…");
        assert_eq!(truncate_with_suffix("abc", 3, "…"), "abc");
        assert_eq!(truncate_with_suffix("ünïcödé", 4, "..."), "ünïc...");
    }
}
