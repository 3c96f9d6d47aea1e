use chrono::{DateTime, NaiveTime, Utc};
use rand::Rng;
use rusqlite::{named_params, params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::{
    app::{context::RequestContext, errors::AppError},
    models::{AiFields, FullBookmark, Item, NewItem, UserId},
    semantic::index::{decode_vector, encode_vector},
};

use super::{constraint_violation, Constraint, Store};

const ID_LEN: usize = 8;
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
const MAX_ID_ATTEMPTS: usize = 5;

/// Highest page number accepted by `by_user` (exclusive)
const MAX_PAGE: usize = 100;

pub(super) const ITEM_COLUMNS: &str = "i.id, i.user_id, i.title, i.link, i.source, c.excerpt, \
     i.image_url, i.site_name, c.article_lang, c.published_time, i.created_at, \
     i.ai_summary, i.ai_excerpt, i.ai_tags";

pub(super) const ITEM_FROM: &str =
    "library_items i JOIN library_contents c ON c.id = i.id";

pub(super) fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        source: row.get(4)?,
        excerpt: row.get(5)?,
        image_url: row.get(6)?,
        site_name: row.get(7)?,
        article_lang: row.get(8)?,
        published_time: row.get(9)?,
        created_at: row.get(10)?,
        ai_summary: row.get(11)?,
        ai_excerpt: row.get(12)?,
        ai_tags: row.get(13)?,
    })
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Creation quota enforced inside the insert transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPolicy {
    /// Cap on all items ever saved (unverified accounts)
    Lifetime { limit: i64 },
    /// Cap on items saved since UTC midnight
    Daily { limit: i64 },
}

impl CreationPolicy {
    pub fn limit(&self) -> i64 {
        match self {
            CreationPolicy::Lifetime { limit } | CreationPolicy::Daily { limit } => *limit,
        }
    }

    pub(crate) fn count(&self, conn: &Connection, user_id: UserId) -> rusqlite::Result<i64> {
        match self {
            CreationPolicy::Lifetime { .. } => conn.query_row(
                "SELECT COUNT(*) FROM library_items WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            ),
            CreationPolicy::Daily { .. } => conn.query_row(
                "SELECT COUNT(*) FROM library_items WHERE user_id = ?1 AND created_at >= ?2",
                params![user_id, start_of_today()],
                |row| row.get(0),
            ),
        }
    }

    pub fn check(&self, count: i64) -> Result<(), AppError> {
        if count < self.limit() {
            return Ok(());
        }

        match self {
            CreationPolicy::Lifetime { limit } => Err(AppError::UnverifiedLimitExceeded(*limit)),
            CreationPolicy::Daily { limit } => Err(AppError::DailyLimitExceeded(*limit)),
        }
    }
}

pub(crate) fn start_of_today() -> DateTime<Utc> {
    Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub more_pages: bool,
}

/// Rebuild the lexical index row for `id` from the current item and content.
fn refresh_search_row(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM library_search WHERE item_id = ?1", params![id])?;
    conn.execute(
        "INSERT INTO library_search (item_id, title, excerpt, content, ai_summary, ai_tags)
         SELECT i.id, i.title, c.excerpt, c.content, COALESCE(i.ai_summary, ''), COALESCE(i.ai_tags, '')
         FROM library_items i JOIN library_contents c ON c.id = i.id
         WHERE i.id = ?1",
        params![id],
    )?;
    Ok(())
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn get_item(conn: &Connection, id: &str) -> Result<Item, AppError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM {ITEM_FROM} WHERE i.id = ?1");
    conn.query_row(&sql, params![id], item_from_row)
        .optional()?
        .ok_or(AppError::NotFound)
}

impl Store {
    /// Insert item and content in one transaction.
    ///
    /// Fails with `DuplicateItem` when the user already saved `link`, and with
    /// the policy's quota error when the user is at the limit.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        new: NewItem,
        policy: Option<CreationPolicy>,
    ) -> Result<Item, AppError> {
        self.run(ctx, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM library_items WHERE user_id = ?1 AND link = ?2)",
                params![new.user_id, new.link],
                |row| row.get(0),
            )?;
            if exists {
                return Err(AppError::DuplicateItem);
            }

            if let Some(policy) = policy {
                policy.check(policy.count(&tx, new.user_id)?)?;
            }

            let created_at = Utc::now();
            for _ in 0..MAX_ID_ATTEMPTS {
                let id = generate_id();
                let inserted = tx.execute(
                    "INSERT INTO library_items (id, user_id, title, link, source, image_url, site_name, created_at)
                     VALUES (:id, :user_id, :title, :link, :source, :image_url, :site_name, :created_at)",
                    named_params! {
                        ":id": id,
                        ":user_id": new.user_id,
                        ":title": new.title,
                        ":link": new.link,
                        ":source": new.source,
                        ":image_url": new.image_url,
                        ":site_name": new.site_name,
                        ":created_at": created_at,
                    },
                );

                match inserted {
                    Ok(_) => {}
                    Err(err) => match constraint_violation(&err) {
                        Some(Constraint::PrimaryKey) => {
                            log::debug!("item id collision on {id}, retrying");
                            continue;
                        }
                        Some(Constraint::Unique) => return Err(AppError::DuplicateItem),
                        None => return Err(err.into()),
                    },
                }

                tx.execute(
                    "INSERT INTO library_contents (id, content, excerpt, article_lang, published_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, new.content, new.excerpt, new.article_lang, new.published_time],
                )?;
                refresh_search_row(&tx, &id)?;

                let item = get_item(&tx, &id)?;
                tx.commit()?;
                return Ok(item);
            }

            Err(AppError::Storage(format!(
                "could not allocate a unique item id after {MAX_ID_ATTEMPTS} attempts"
            )))
        })
        .await
    }

    /// Write AI fields. Empty values never overwrite existing ones.
    pub async fn update_ai(&self, ctx: &RequestContext, id: &str, ai: AiFields) -> Result<(), AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE library_items SET
                    ai_summary = COALESCE(?2, ai_summary),
                    ai_excerpt = COALESCE(?3, ai_excerpt),
                    ai_tags = COALESCE(?4, ai_tags)
                 WHERE id = ?1",
                params![
                    id,
                    non_empty(&ai.summary),
                    non_empty(&ai.excerpt),
                    non_empty(&ai.tags)
                ],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound);
            }

            tx.execute(
                "UPDATE library_contents SET ai_markdown = COALESCE(?2, ai_markdown) WHERE id = ?1",
                params![id, non_empty(&ai.markdown)],
            )?;
            refresh_search_row(&tx, &id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn set_embedding(
        &self,
        ctx: &RequestContext,
        id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let updated = conn.execute(
                "UPDATE library_contents SET content_embedding = ?2 WHERE id = ?1",
                params![id, encode_vector(&embedding)],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> Result<Item, AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| get_item(conn, &id)).await
    }

    pub async fn get_by_link(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        link: &str,
    ) -> Result<Item, AppError> {
        let link = link.to_string();
        self.run(ctx, move |conn| {
            let sql = format!("SELECT {ITEM_COLUMNS} FROM {ITEM_FROM} WHERE i.user_id = ?1 AND i.link = ?2");
            conn.query_row(&sql, params![user_id, link], item_from_row)
                .optional()?
                .ok_or(AppError::NotFound)
        })
        .await
    }

    pub async fn get_full(&self, ctx: &RequestContext, id: &str) -> Result<FullBookmark, AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let item = get_item(conn, &id)?;
            let (content, ai_markdown, blob): (String, Option<String>, Option<Vec<u8>>) = conn
                .query_row(
                    "SELECT content, ai_markdown, content_embedding FROM library_contents WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

            let embedding = match blob {
                Some(blob) => Some(
                    decode_vector(&blob).map_err(|err| AppError::Storage(err.to_string()))?,
                ),
                None => None,
            };

            Ok(FullBookmark {
                item,
                content,
                ai_markdown,
                embedding,
            })
        })
        .await
    }

    pub async fn get_content(&self, ctx: &RequestContext, id: &str) -> Result<String, AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            conn.query_row(
                "SELECT content FROM library_contents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(AppError::NotFound)
        })
        .await
    }

    /// AI markdown of an item, `NotFound` when enrichment never succeeded.
    pub async fn get_markdown(&self, ctx: &RequestContext, id: &str) -> Result<String, AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let markdown: Option<Option<String>> = conn
                .query_row(
                    "SELECT ai_markdown FROM library_contents WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            markdown.flatten().ok_or(AppError::NotFound)
        })
        .await
    }

    /// Newest-first page of a user's items, `page` starting at 1.
    pub async fn by_user(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, AppError> {
        if page == 0 || page >= MAX_PAGE {
            return Err(AppError::InvalidInput(format!(
                "page must be between 1 and {}",
                MAX_PAGE - 1
            )));
        }

        self.run(ctx, move |conn| {
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM {ITEM_FROM} WHERE i.user_id = ?1
                 ORDER BY i.created_at DESC, i.rowid DESC LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut items = stmt
                .query_map(
                    params![user_id, (page_size + 1) as i64, ((page - 1) * page_size) as i64],
                    item_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let more_pages = items.len() > page_size;
            items.truncate(page_size);
            Ok(Page { items, more_pages })
        })
        .await
    }

    pub async fn recent(&self, ctx: &RequestContext, user_id: UserId, n: usize) -> Result<Vec<Item>, AppError> {
        self.run(ctx, move |conn| {
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM {ITEM_FROM} WHERE i.user_id = ?1
                 ORDER BY i.created_at DESC, i.rowid DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params![user_id, n as i64], item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    /// Every item of a user, oldest first.
    pub async fn all_for_user(&self, ctx: &RequestContext, user_id: UserId) -> Result<Vec<Item>, AppError> {
        self.run(ctx, move |conn| {
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM {ITEM_FROM} WHERE i.user_id = ?1
                 ORDER BY i.created_at ASC, i.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params![user_id], item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    /// Persist title and link only.
    pub async fn update(&self, ctx: &RequestContext, item: &Item) -> Result<Item, AppError> {
        let id = item.id.clone();
        let title = item.title.clone();
        let link = item.link.clone();
        self.run(ctx, move |conn| {
            let tx = conn.transaction()?;
            let updated = tx
                .execute(
                    "UPDATE library_items SET title = ?2, link = ?3 WHERE id = ?1",
                    params![id, title, link],
                )
                .map_err(|err| match constraint_violation(&err) {
                    Some(Constraint::Unique) => AppError::DuplicateItem,
                    _ => err.into(),
                })?;
            if updated == 0 {
                return Err(AppError::NotFound);
            }

            refresh_search_row(&tx, &id)?;
            let item = get_item(&tx, &id)?;
            tx.commit()?;
            Ok(item)
        })
        .await
    }

    /// Delete an item; its content row goes with it.
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<(), AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM library_search WHERE item_id = ?1", params![id])?;
            let deleted = tx.execute("DELETE FROM library_items WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(AppError::NotFound);
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn count_for_policy(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        policy: CreationPolicy,
    ) -> Result<i64, AppError> {
        self.run(ctx, move |conn| Ok(policy.count(conn, user_id)?))
            .await
    }

    /// `(item id, embedding blob)` for every item of the user that has a vector.
    pub async fn embeddings_for_user(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<Vec<(String, Vec<u8>)>, AppError> {
        self.run(ctx, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT i.id, c.content_embedding FROM library_items i
                 JOIN library_contents c ON c.id = i.id
                 WHERE i.user_id = ?1 AND c.content_embedding IS NOT NULL",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Items with the given ids that belong to `user_id`, in the order given.
    pub async fn items_by_ids(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        ids: Vec<String>,
    ) -> Result<Vec<Item>, AppError> {
        self.run(ctx, move |conn| {
            let sql = format!("SELECT {ITEM_COLUMNS} FROM {ITEM_FROM} WHERE i.id = ?1 AND i.user_id = ?2");
            let mut stmt = conn.prepare(&sql)?;
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(item) = stmt.query_row(params![id, user_id], item_from_row).optional()? {
                    items.push(item);
                }
            }
            Ok(items)
        })
        .await
    }
}
