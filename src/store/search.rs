use rusqlite::{params, Row};

use crate::{
    app::{context::RequestContext, errors::AppError},
    models::{SearchHit, UserId},
};

use super::Store;

/// Rows returned by one lexical query
pub const SEARCH_LIMIT: i64 = 10;

/// Tokens around each match in a headline
const HEADLINE_TOKENS: i64 = 24;

// Column weights in declaration order: item_id, title, excerpt, content,
// ai_summary, ai_tags. bm25() is negative for better matches.
const FTS_SQL: &str = "SELECT
        snippet(library_search, 3, '<strong>', '</strong>', '…', ?3) AS headline,
        i.id, i.title, i.link, c.excerpt, i.image_url, i.created_at,
        -bm25(library_search, 0.0, 1.0, 0.4, 0.2, 0.2, 0.4) AS rank,
        i.ai_summary, i.ai_excerpt, i.ai_tags
    FROM library_search
    JOIN library_items i ON i.id = library_search.item_id
    JOIN library_contents c ON c.id = i.id
    WHERE library_search MATCH ?1 AND i.user_id = ?2
    ORDER BY rank DESC, i.created_at DESC
    LIMIT ?4";

const LIKE_SQL: &str = "SELECT
        c.excerpt AS headline,
        i.id, i.title, i.link, c.excerpt, i.image_url, i.created_at,
        CASE
            WHEN lower(i.title) LIKE ?1 THEN 1.0
            WHEN lower(c.excerpt) LIKE ?1 THEN 0.8
            WHEN lower(c.content) LIKE ?1 THEN 0.6
            WHEN lower(COALESCE(i.ai_summary, '')) LIKE ?1 THEN 0.5
            WHEN lower(COALESCE(i.ai_tags, '')) LIKE ?1 THEN 0.3
            ELSE 0.1
        END AS rank,
        i.ai_summary, i.ai_excerpt, i.ai_tags
    FROM library_items i
    JOIN library_contents c ON c.id = i.id
    WHERE i.user_id = ?2 AND (
        lower(i.title) LIKE ?1
        OR lower(c.excerpt) LIKE ?1
        OR lower(c.content) LIKE ?1
        OR lower(COALESCE(i.ai_summary, '')) LIKE ?1
        OR lower(COALESCE(i.ai_tags, '')) LIKE ?1
    )
    ORDER BY rank DESC, i.created_at DESC
    LIMIT ?3";

fn hit_from_row(row: &Row) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        headline: row.get(0)?,
        id: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        excerpt: row.get(4)?,
        image_url: row.get(5)?,
        created_at: row.get(6)?,
        rank: row.get(7)?,
        ai_summary: row.get(8)?,
        ai_excerpt: row.get(9)?,
        ai_tags: row.get(10)?,
    })
}

impl Store {
    /// Full-text match over title, excerpt, content and AI fields.
    ///
    /// `expression` must already be a valid FTS5 query; syntax errors surface
    /// as `Storage` so callers can fall back to substring matching.
    pub async fn search_fts(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        expression: &str,
    ) -> Result<Vec<SearchHit>, AppError> {
        let expression = expression.to_string();
        self.run(ctx, move |conn| {
            let mut stmt = conn.prepare(FTS_SQL)?;
            let hits = stmt
                .query_map(
                    params![expression, user_id, HEADLINE_TOKENS, SEARCH_LIMIT],
                    hit_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        })
        .await
    }

    /// Case-insensitive substring match; `pattern` is a complete LIKE pattern.
    pub async fn search_like(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        pattern: &str,
    ) -> Result<Vec<SearchHit>, AppError> {
        let pattern = pattern.to_lowercase();
        self.run(ctx, move |conn| {
            let mut stmt = conn.prepare(LIKE_SQL)?;
            let hits = stmt
                .query_map(params![pattern, user_id, SEARCH_LIMIT], hit_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        })
        .await
    }
}
