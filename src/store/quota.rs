use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::{
    app::{context::RequestContext, errors::AppError},
    models::UserId,
};

use super::Store;

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl Store {
    /// Count one AI question against today's quota.
    ///
    /// The increment is rolled back when it would exceed `limit`, so a denied
    /// question never consumes quota.
    pub async fn increment_ai_questions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        day: NaiveDate,
        limit: i64,
    ) -> Result<i64, AppError> {
        self.run(ctx, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let count: i64 = tx.query_row(
                "INSERT INTO daily_ai_limits (user_id, day, question_count) VALUES (?1, ?2, 1)
                 ON CONFLICT(user_id, day) DO UPDATE SET question_count = question_count + 1
                 RETURNING question_count",
                params![user_id, day],
                |row| row.get(0),
            )?;

            if count > limit {
                tx.rollback()?;
                return Err(AppError::AIQuotaExceeded(limit));
            }

            tx.commit()?;
            Ok(count)
        })
        .await
    }

    pub async fn ai_question_count(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        day: NaiveDate,
    ) -> Result<i64, AppError> {
        self.run(ctx, move |conn| {
            let count = conn
                .query_row(
                    "SELECT question_count FROM daily_ai_limits WHERE user_id = ?1 AND day = ?2",
                    params![user_id, day],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.unwrap_or(0))
        })
        .await
    }
}
