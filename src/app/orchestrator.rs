//! Bookmark ingestion: fetch, extract, sanitize, persist, then enrich.
//!
//! Persistence is the durability boundary. AI enrichment and the document
//! embedding run afterwards, concurrently, and their failures are logged and
//! swallowed so the saved item is always returned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use crate::{
    ai::Enricher,
    app::{context::RequestContext, errors::AppError, limits::RateLimiter},
    links,
    models::{AiFields, ExtractedArticle, Item, NewItem, Source, User},
    scrape::{
        readability,
        sanitize::{clean_body, clean_html_for_llm, clean_text, strip_tags},
        ContentFetcher,
    },
    semantic::Embedder,
    store::{CreationPolicy, Store},
};

const UNKNOWN_TITLE: &str = "Unknown title";
const EXCERPT_FALLBACK_CHARS: usize = 200;

/// Fields a browser extension extracted on the client.
#[derive(Debug, Clone, Default)]
pub struct ClientContent {
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub lang: Option<String>,
    pub site_name: Option<String>,
    pub published_time: Option<String>,
    pub image_url: Option<String>,
}

impl ClientContent {
    pub fn has_content(&self) -> bool {
        [&self.html_content, &self.text_content]
            .iter()
            .any(|c| c.as_deref().is_some_and(|c| !c.trim().is_empty()))
    }
}

/// Result of the unauthenticated extraction demo.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DemoExtraction {
    pub title: String,
    pub content: String,
    pub summary: String,
}

#[derive(Clone)]
pub struct Ingestor {
    store: Store,
    limiter: RateLimiter,
    fetcher: Arc<dyn ContentFetcher>,
    enricher: Option<Arc<Enricher>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl Ingestor {
    pub fn new(
        store: Store,
        limiter: RateLimiter,
        fetcher: Arc<dyn ContentFetcher>,
        enricher: Option<Arc<Enricher>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            store,
            limiter,
            fetcher,
            enricher,
            embedder,
        }
    }

    /// Save `link` for `user`, fetching and extracting the page server-side.
    /// Re-saving a link returns the existing item.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        user: &User,
        link: &str,
        source: Source,
    ) -> Result<Item, AppError> {
        let link = links::canonicalize(link)?;
        let policy = self.limiter.check_creation(ctx, user).await?;
        if let Some(existing) = self.existing(ctx, user, &link).await? {
            return Ok(existing);
        }

        let article = self.fetch_article(ctx, &link).await?;
        let llm_input = article.text.clone();
        self.persist_and_enrich(ctx, user, link, source, article, policy, llm_input)
            .await
    }

    /// Save `link` with content extracted by a client, skipping the fetch.
    pub async fn create_with_content(
        &self,
        ctx: &RequestContext,
        user: &User,
        link: &str,
        source: Source,
        content: ClientContent,
    ) -> Result<Item, AppError> {
        let link = links::canonicalize(link)?;
        let policy = self.limiter.check_creation(ctx, user).await?;
        if let Some(existing) = self.existing(ctx, user, &link).await? {
            return Ok(existing);
        }

        let html = content
            .html_content
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .map(clean_html_for_llm);

        let text = match (&html, content.text_content.as_deref()) {
            (_, Some(text)) if !text.trim().is_empty() => text.to_string(),
            (Some(html), _) => strip_tags(html),
            _ => String::new(),
        };

        let excerpt = content
            .excerpt
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| clean_text(&text).chars().take(EXCERPT_FALLBACK_CHARS).collect());
        let title = content
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

        let llm_input = html.unwrap_or_else(|| text.clone());
        let article = ExtractedArticle {
            title,
            text,
            excerpt,
            image_url: content.image_url.unwrap_or_default(),
            lang: content.lang.unwrap_or_default(),
            site_name: content.site_name.unwrap_or_default(),
            published_time: content.published_time,
        };

        self.persist_and_enrich(ctx, user, link, source, article, policy, llm_input)
            .await
    }

    /// Fetch and extract without persisting; summary is best-effort.
    pub async fn extract_only(&self, ctx: &RequestContext, link: &str) -> Result<DemoExtraction, AppError> {
        if !links::is_url_valid(link) {
            return Err(AppError::InvalidUrl(link.to_string()));
        }

        let article = self.fetch_article(ctx, link).await?;
        let content = clean_body(&article.text);

        let mut summary = String::new();
        if let Some(enricher) = &self.enricher {
            if content.chars().count() > 100 {
                match enricher.summarize(ctx, &content).await {
                    Ok(s) => summary = s,
                    Err(err) => log::warn!("demo summary for {link} failed: {err}"),
                }
            }
        }

        Ok(DemoExtraction {
            title: clean_text(&article.title),
            content,
            summary,
        })
    }

    async fn existing(&self, ctx: &RequestContext, user: &User, link: &str) -> Result<Option<Item>, AppError> {
        match self.store.get_by_link(ctx, user.id, link).await {
            Ok(item) => {
                log::debug!("{link} already saved as {}", item.id);
                Ok(Some(item))
            }
            Err(AppError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn fetch_article(&self, ctx: &RequestContext, link: &str) -> Result<ExtractedArticle, AppError> {
        let page_url = Url::parse(link).map_err(|err| AppError::InvalidUrl(format!("{link}: {err}")))?;
        let html = ctx.run(self.fetcher.fetch(ctx, link)).await?;

        ctx.run(async move {
            tokio::task::spawn_blocking(move || readability::extract(&html, &page_url))
                .await
                .map_err(|err| AppError::Extraction(format!("readability task failed: {err}")))
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_and_enrich(
        &self,
        ctx: &RequestContext,
        user: &User,
        link: String,
        source: Source,
        article: ExtractedArticle,
        policy: CreationPolicy,
        llm_input: String,
    ) -> Result<Item, AppError> {
        let new = sanitized_item(user, link, source, article);
        let title = new.title.clone();
        let content = new.content.clone();

        let item = match self.store.create(ctx, new.clone(), Some(policy)).await {
            Ok(item) => item,
            // lost a race with a concurrent save of the same link
            Err(AppError::DuplicateItem) => return self.store.get_by_link(ctx, user.id, &new.link).await,
            Err(err) => return Err(err),
        };
        log::info!("saved {} as {}", item.link, item.id);

        let (ai, embedding) = tokio::join!(
            self.enrichment(ctx, &llm_input),
            self.embedding(ctx, &title, &content)
        );

        match ai {
            Ok(Some(fields)) => {
                if let Err(err) = self.store.update_ai(ctx, &item.id, fields).await {
                    ctx.span().in_scope(|| log::warn!("storing AI fields for {} failed: {err}", item.id));
                }
            }
            Ok(None) => {}
            Err(err) => ctx.span().in_scope(|| log::warn!("AI enrichment for {} failed: {err}", item.id)),
        }
        match embedding {
            Ok(Some(vector)) => {
                if let Err(err) = self.store.set_embedding(ctx, &item.id, vector).await {
                    ctx.span().in_scope(|| log::warn!("storing embedding for {} failed: {err}", item.id));
                }
            }
            Ok(None) => {}
            Err(err) => ctx.span().in_scope(|| log::warn!("embedding {} failed: {err}", item.id)),
        }

        self.store.get_by_id(ctx, &item.id).await
    }

    async fn enrichment(&self, ctx: &RequestContext, input: &str) -> Result<Option<AiFields>, AppError> {
        let Some(enricher) = &self.enricher else {
            return Ok(None);
        };
        if input.trim().is_empty() {
            return Ok(None);
        }
        enricher.enrich(ctx, input).await.map(Some)
    }

    async fn embedding(&self, ctx: &RequestContext, title: &str, body: &str) -> Result<Option<Vec<f32>>, AppError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        if title.trim().is_empty() && body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(embedder.embed_document(ctx, title, body).await?))
    }
}

/// Strip markup from every text field and drop unusable image links.
fn sanitized_item(user: &User, link: String, source: Source, article: ExtractedArticle) -> NewItem {
    NewItem {
        user_id: user.id,
        source,
        link,
        title: clean_text(&article.title),
        excerpt: clean_text(&article.excerpt),
        image_url: valid_image_url(&article.image_url),
        site_name: clean_text(&article.site_name),
        article_lang: clean_text(&article.lang),
        published_time: article.published_time.as_deref().and_then(parse_published_time),
        content: clean_body(&article.text),
    }
}

fn valid_image_url(image_url: &str) -> String {
    match Url::parse(image_url.trim()) {
        Ok(url) if url.has_host() => url.to_string(),
        Ok(_) => String::new(),
        Err(err) => {
            if !image_url.is_empty() {
                log::warn!("dropping image url {image_url:?}: {err}");
            }
            String::new()
        }
    }
}

fn parse_published_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_image_url() {
        assert_eq!(valid_image_url("https://cdn.example.com/a.png"), "https://cdn.example.com/a.png");
        assert_eq!(valid_image_url("not a url"), "");
        assert_eq!(valid_image_url("data:image/png;base64,AAAA"), "");
        assert_eq!(valid_image_url(""), "");
    }

    #[test]
    fn test_parse_published_time() {
        let t = parse_published_time("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert!(parse_published_time("2024-03-01").is_some());
        assert!(parse_published_time("Fri, 01 Mar 2024 10:00:00 GMT").is_some());
        assert!(parse_published_time("yesterday").is_none());
    }

    #[test]
    fn test_sanitized_item_strips_markup() {
        let user = User {
            id: 1,
            email: "u@example.com".into(),
            email_verified: true,
            subscription_status: Default::default(),
        };
        let article = ExtractedArticle {
            title: "<b>Hello</b>\tworld".into(),
            text: "<p>First</p>\n\nSecond<script>x()</script>".into(),
            excerpt: "An &amp; excerpt".into(),
            image_url: "::bad".into(),
            lang: "<i>en</i>".into(),
            site_name: "Site".into(),
            published_time: None,
        };
        let new = sanitized_item(&user, "https://example.com".into(), Source::Api, article);
        assert_eq!(new.title, "Hello world");
        assert_eq!(new.excerpt, "An & excerpt");
        assert_eq!(new.article_lang, "en");
        assert_eq!(new.image_url, "");
        assert!(!new.content.contains('<'));
        assert!(!new.content.contains("x()"));
    }

    #[test]
    fn test_client_content_presence() {
        assert!(!ClientContent::default().has_content());
        let content = ClientContent {
            text_content: Some("  ".into()),
            ..Default::default()
        };
        assert!(!content.has_content());
        let content = ClientContent {
            html_content: Some("<p>x</p>".into()),
            ..Default::default()
        };
        assert!(content.has_content());
    }
}
