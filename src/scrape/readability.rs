//! Readable-article extraction from raw HTML.
//!
//! Metadata comes from `<head>` (OpenGraph, Twitter cards, schema.org hints),
//! the body text from the densest content container. Empty extractions are
//! valid results.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use scraper::{node::Node, ElementRef, Html, Selector};
use url::Url;

use crate::models::ExtractedArticle;

/// Length of an excerpt derived from body text when no description exists
const EXCERPT_FALLBACK_CHARS: usize = 200;

/// Containers whose text never belongs to the article
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "aside", "footer", "header", "form",
    "button", "iframe", "svg", "select", "textarea", "figure",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul",
    "ol", "pre", "blockquote", "table", "tr", "br", "hr", "dd", "dt",
];

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector must parse")
}

static META: Lazy<Selector> = Lazy::new(|| selector("meta"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static H1: Lazy<Selector> = Lazy::new(|| selector("h1"));
static HTML: Lazy<Selector> = Lazy::new(|| selector("html"));
static TIME: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| selector("p"));
static BODY: Lazy<Selector> = Lazy::new(|| selector("body"));
static CANDIDATES: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "[itemprop=articleBody]", "main", "[role=main]", "#content", ".post-content", ".entry-content"]
        .iter()
        .map(|s| selector(s))
        .collect()
});

/// Extract the readable article from `html` fetched from `page_url`.
pub fn extract(html: &str, page_url: &Url) -> ExtractedArticle {
    let document = Html::parse_document(html);
    let meta = collect_meta(&document);

    let title = first_of(&meta, &["og:title", "twitter:title"])
        .or_else(|| select_text(&document, &TITLE))
        .or_else(|| select_text(&document, &H1))
        .unwrap_or_default();

    let text = article_root(&document)
        .map(|root| {
            let mut out = String::new();
            collect_text(root, &mut out);
            normalize_paragraphs(&out)
        })
        .unwrap_or_default();

    let excerpt = first_of(&meta, &["description", "og:description", "twitter:description"])
        .unwrap_or_else(|| {
            text.split("\n\n")
                .next()
                .map(|p| p.chars().take(EXCERPT_FALLBACK_CHARS).collect())
                .unwrap_or_default()
        });

    let image_url = first_of(&meta, &["og:image", "og:image:url", "twitter:image", "twitter:image:src"])
        .and_then(|src| page_url.join(&src).ok())
        .map(|u| u.to_string())
        .unwrap_or_default();

    let lang = document
        .select(&HTML)
        .next()
        .and_then(|el| el.attr("lang"))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .or_else(|| first_of(&meta, &["content-language", "og:locale"]))
        .unwrap_or_default();

    let site_name = first_of(&meta, &["og:site_name", "application-name"])
        .or_else(|| page_url.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default();

    let published_time = first_of(
        &meta,
        &["article:published_time", "datepublished", "date", "dc.date", "pubdate"],
    )
    .or_else(|| {
        document
            .select(&TIME)
            .next()
            .and_then(|el| el.attr("datetime"))
            .map(|d| d.trim().to_string())
    });

    ExtractedArticle {
        title,
        text,
        excerpt,
        image_url,
        lang,
        site_name,
        published_time,
    }
}

/// Lowercased meta key (name, property, itemprop or http-equiv) to first value.
fn collect_meta(document: &Html) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    for element in document.select(&META) {
        let key = element
            .attr("property")
            .or_else(|| element.attr("name"))
            .or_else(|| element.attr("itemprop"))
            .or_else(|| element.attr("http-equiv"));
        let value = element.attr("content").map(str::trim).unwrap_or_default();

        if let Some(key) = key {
            if !value.is_empty() {
                meta.entry(key.trim().to_lowercase())
                    .or_insert_with(|| value.to_string());
            }
        }
    }
    meta
}

fn first_of(meta: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| meta.get(*k).cloned())
}

fn select_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Pick the element most likely to hold the article body.
fn article_root(document: &Html) -> Option<ElementRef<'_>> {
    for candidate in CANDIDATES.iter() {
        let best = document
            .select(candidate)
            .max_by_key(|el| paragraph_chars(*el));
        if let Some(el) = best {
            if paragraph_chars(el) > 0 {
                return Some(el);
            }
        }
    }

    // score parents by the amount of paragraph text they directly contain
    let mut scores: HashMap<_, usize> = HashMap::new();
    for p in document.select(&PARAGRAPH) {
        let len = p.text().map(|t| t.trim().len()).sum::<usize>();
        if let Some(parent) = p.parent() {
            *scores.entry(parent.id()).or_default() += len;
        }
    }

    scores
        .into_iter()
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .and_then(|(id, _)| document.tree.get(id))
        .and_then(ElementRef::wrap)
        .or_else(|| document.select(&BODY).next())
}

fn paragraph_chars(el: ElementRef<'_>) -> usize {
    el.select(&PARAGRAPH)
        .map(|p| p.text().map(|t| t.trim().len()).sum::<usize>())
        .sum()
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push_str("\n\n");
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if block {
                    out.push_str("\n\n");
                }
            }
            _ => {}
        }
    }
}

/// Collapse whitespace inside paragraphs and separate paragraphs by a blank line.
fn normalize_paragraphs(raw: &str) -> String {
    raw.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://www.example.com/posts/rust").unwrap()
    }

    const ARTICLE: &str = r#"
        <html lang="en">
        <head>
            <title>Fallback title</title>
            <meta property="og:title" content="Ownership in Rust">
            <meta name="description" content="A short tour of ownership.">
            <meta property="og:image" content="/img/cover.png">
            <meta property="og:site_name" content="Example Blog">
            <meta property="article:published_time" content="2024-03-01T10:00:00Z">
        </head>
        <body>
            <nav><a href="/">Home</a> <a href="/about">About</a></nav>
            <article>
                <h1>Ownership in Rust</h1>
                <p>Every value has a single owner.</p>
                <p>When the owner goes   out of scope, the value is dropped.</p>
                <script>trackReader()</script>
            </article>
            <footer>Copyright</footer>
        </body>
        </html>
    "#;

    #[test]
    fn test_extracts_metadata() {
        let article = extract(ARTICLE, &url());
        assert_eq!(article.title, "Ownership in Rust");
        assert_eq!(article.excerpt, "A short tour of ownership.");
        assert_eq!(article.image_url, "https://www.example.com/img/cover.png");
        assert_eq!(article.site_name, "Example Blog");
        assert_eq!(article.lang, "en");
        assert_eq!(
            article.published_time.as_deref(),
            Some("2024-03-01T10:00:00Z")
        );
    }

    #[test]
    fn test_extracts_article_body_only() {
        let article = extract(ARTICLE, &url());
        assert!(article.text.contains("Every value has a single owner."));
        assert!(article
            .text
            .contains("When the owner goes out of scope, the value is dropped."));
        assert!(!article.text.contains("Home"));
        assert!(!article.text.contains("trackReader"));
        assert!(!article.text.contains("Copyright"));
    }

    #[test]
    fn test_falls_back_to_densest_container() {
        let html = r#"
            <html><head><title> Plain page </title></head>
            <body>
                <div class="sidebar"><p>Ad</p></div>
                <div class="story">
                    <p>First paragraph of the story with plenty of words.</p>
                    <p>Second paragraph continues the story.</p>
                </div>
            </body></html>
        "#;
        let article = extract(html, &url());
        assert_eq!(article.title, "Plain page");
        assert!(article.text.starts_with("First paragraph"));
        assert!(!article.text.contains("Ad"));
        assert_eq!(
            article.excerpt,
            "First paragraph of the story with plenty of words."
        );
        assert_eq!(article.site_name, "example.com");
    }

    #[test]
    fn test_empty_document() {
        let article = extract("", &url());
        assert_eq!(article.title, "");
        assert_eq!(article.text, "");
        assert_eq!(article.image_url, "");
        assert_eq!(article.published_time, None);
    }
}
