use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    app::{context::RequestContext, errors::AppError},
    models::{AuthTokenType, SubscriptionStatus, User, UserId},
};

use super::{constraint_violation, Store};

const USER_COLUMNS: &str = "u.id, u.email, u.email_verified, u.subscription_status";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        email_verified: row.get(2)?,
        subscription_status: row.get(3)?,
    })
}

impl Store {
    pub async fn create_user(
        &self,
        ctx: &RequestContext,
        email: &str,
        email_verified: bool,
        subscription_status: SubscriptionStatus,
    ) -> Result<User, AppError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::InvalidInput("email is required".to_string()));
        }

        self.run(ctx, move |conn| {
            conn.execute(
                "INSERT INTO users (email, email_verified, subscription_status, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![email, email_verified, subscription_status, Utc::now()],
            )
            .map_err(|err| match constraint_violation(&err) {
                Some(_) => AppError::InvalidInput(format!("user {email} already exists")),
                None => err.into(),
            })?;

            Ok(User {
                id: conn.last_insert_rowid(),
                email,
                email_verified,
                subscription_status,
            })
        })
        .await
    }

    pub async fn get_user(&self, ctx: &RequestContext, id: UserId) -> Result<User, AppError> {
        self.run(ctx, move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
            conn.query_row(&sql, params![id], user_from_row)
                .optional()?
                .ok_or(AppError::NotFound)
        })
        .await
    }

    pub async fn get_user_by_email(&self, ctx: &RequestContext, email: &str) -> Result<User, AppError> {
        let email = email.trim().to_lowercase();
        self.run(ctx, move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?1");
            conn.query_row(&sql, params![email], user_from_row)
                .optional()?
                .ok_or(AppError::NotFound)
        })
        .await
    }

    /// Store the hash of a freshly issued token.
    pub async fn issue_token(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        token_type: AuthTokenType,
        token_hash: &str,
    ) -> Result<(), AppError> {
        let token_hash = token_hash.to_string();
        self.run(ctx, move |conn| {
            conn.execute(
                "INSERT INTO auth_tokens (token_hash, user_id, token_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, user_id, token_type, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    /// Resolve a token hash of the given type to its owner, `Unauthorized`
    /// when no such token exists.
    pub async fn user_by_token(
        &self,
        ctx: &RequestContext,
        token_hash: &str,
        token_type: AuthTokenType,
    ) -> Result<User, AppError> {
        let token_hash = token_hash.to_string();
        self.run(ctx, move |conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM auth_tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.token_hash = ?1 AND t.token_type = ?2"
            );
            conn.query_row(&sql, params![token_hash, token_type], user_from_row)
                .optional()?
                .ok_or(AppError::Unauthorized)
        })
        .await
    }
}
