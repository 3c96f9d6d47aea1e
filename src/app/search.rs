//! Hybrid bookmark search: full-text with a substring fallback for the
//! search box, and nearest-neighbour retrieval over embeddings for Q&A.

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    app::{context::RequestContext, errors::AppError},
    models::{Item, SearchHit, UserId, VectorHit},
    semantic::{
        index::{decode_vector, VectorIndex},
        Embedder,
    },
    store::{Store, SEARCH_LIMIT},
};

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^A-Za-z0-9 \-"']"#).expect("Failed to compile query regex"));

/// Keep letters, digits, spaces, hyphens and quotes; collapse whitespace.
pub fn sanitize_query(query: &str) -> String {
    DISALLOWED_CHARS
        .replace_all(query, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prefix-match conjunction in `tok:* & tok:*` notation.
pub fn prefix_expression(sanitized: &str) -> String {
    sanitized
        .split_whitespace()
        .map(|tok| format!("{tok}:*"))
        .collect::<Vec<_>>()
        .join(" & ")
}

/// Same conjunction in FTS5 syntax. Each token is quoted so operator words
/// like `AND` match literally; tokens without letters or digits are dropped.
pub fn fts_expression(sanitized: &str) -> String {
    sanitized
        .split_whitespace()
        .filter(|tok| tok.chars().any(char::is_alphanumeric))
        .map(|tok| format!("\"{}\"*", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `%tok1%tok2%` LIKE pattern, lowercased.
pub fn like_pattern(sanitized: &str) -> String {
    let mut pattern = String::from("%");
    for tok in sanitized.split_whitespace() {
        let tok = tok.replace(['%', '_'], "");
        if tok.is_empty() {
            continue;
        }
        pattern.push_str(&tok.to_lowercase());
        pattern.push('%');
    }
    pattern
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Store,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SearchEngine {
    pub fn new(store: Store, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { store, embedder }
    }

    /// Up to ten ranked hits for `query`. An empty query yields no hits.
    pub async fn search(&self, ctx: &RequestContext, user_id: UserId, query: &str) -> Result<Vec<SearchHit>, AppError> {
        let sanitized = sanitize_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let expression = fts_expression(&sanitized);
        if !expression.is_empty() {
            log::debug!("lexical query {:?} as {expression}", prefix_expression(&sanitized));
            match self.store.search_fts(ctx, user_id, &expression).await {
                Ok(hits) if !hits.is_empty() => return Ok(hits),
                Ok(_) => {}
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(err) => log::warn!("full-text search for {expression:?} failed, falling back: {err}"),
            }
        }

        let pattern = like_pattern(&sanitized);
        if pattern == "%" {
            return Ok(Vec::new());
        }
        self.store.search_like(ctx, user_id, &pattern).await
    }

    /// Items nearest to `query` by embedding, best first. Items without an
    /// embedding never appear.
    pub async fn vector_search(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        query: &str,
    ) -> Result<Vec<VectorHit>, AppError> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };

        let rows = self.store.embeddings_for_user(ctx, user_id).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = embedder.embed_query(ctx, query).await?;

        let mut index = VectorIndex::with_capacity(embedder.dimensions(), rows.len());
        for (id, blob) in rows {
            let vector = match decode_vector(&blob) {
                Ok(vector) => vector,
                Err(err) => {
                    log::warn!("skipping embedding of {id}: {err}");
                    continue;
                }
            };
            if let Err(err) = index.insert(id.clone(), vector) {
                log::warn!("skipping embedding of {id}: {err}");
            }
        }

        let nearest = index
            .nearest(&query_vector, SEARCH_LIMIT as usize)
            .map_err(|err| AppError::Storage(format!("vector search: {err}")))?;

        let ids = nearest.iter().map(|r| r.id.clone()).collect();
        let mut items: HashMap<String, Item> = self
            .store
            .items_by_ids(ctx, user_id, ids)
            .await?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();

        Ok(nearest
            .into_iter()
            .filter_map(|result| {
                items.remove(&result.id).map(|item| VectorHit {
                    score: result.score(),
                    item,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("foo AND bar; DROP"), "foo AND bar DROP");
        assert_eq!(sanitize_query("  rust\t\nasync  "), "rust async");
        assert_eq!(sanitize_query("it's \"quoted\" - ok"), "it's \"quoted\" - ok");
        assert_eq!(sanitize_query("(*)&|!"), "");
        assert_eq!(sanitize_query(""), "");
    }

    #[test]
    fn test_prefix_expression() {
        assert_eq!(prefix_expression("foo AND bar DROP"), "foo:* & AND:* & bar:* & DROP:*");
        assert_eq!(prefix_expression(""), "");
    }

    #[test]
    fn test_fts_expression_quotes_tokens() {
        assert_eq!(
            fts_expression("foo AND bar DROP"),
            "\"foo\"* AND \"AND\"* AND \"bar\"* AND \"DROP\"*"
        );
        assert_eq!(fts_expression("say \"hi\""), "\"say\"* AND \"\"\"hi\"\"\"*");
        assert_eq!(fts_expression("- '"), "");
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("Foo Bar"), "%foo%bar%");
        assert_eq!(like_pattern(""), "%");
    }
}
