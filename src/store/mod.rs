//! SQLite persistence. The store is the only component that talks to the
//! database; every call borrows a pooled connection on the blocking pool.

mod items;
mod jobs;
mod quota;
mod schema;
mod search;
mod users;

use std::{path::Path, time::Duration};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::{
    app::{context::RequestContext, errors::AppError},
    config::DatabaseConfig,
};

pub use items::CreationPolicy;
pub(crate) use quota::today;
pub use search::SEARCH_LIMIT;

/// Set busy_timeout and foreign keys on every connection handed out by the pool.
#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_idle))
            .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)?;

        let conn = pool.get()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("journal mode: {mode}");
        schema::migrate(&conn)?;
        log::info!("opened database at {}", path.display());

        Ok(Self { pool })
    }

    /// Run `f` with a pooled connection on the blocking pool, aborting the
    /// wait if `ctx` is cancelled. Work already committed stays committed.
    pub(crate) async fn run<F, T>(&self, ctx: &RequestContext, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        ctx.run(async move {
            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get()?;
                f(&mut conn)
            })
            .await
            .map_err(|err| AppError::Storage(format!("blocking task failed: {err}")))?
        })
        .await
    }
}

/// Unique-constraint failures, split by which constraint fired.
pub(crate) fn constraint_violation(err: &rusqlite::Error) -> Option<Constraint> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => match e.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Some(Constraint::PrimaryKey),
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => Some(Constraint::Unique),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Constraint {
    PrimaryKey,
    Unique,
}

#[cfg(test)]
pub(crate) fn open_temp() -> (Store, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let config = DatabaseConfig {
        max_connections: 4,
        min_idle: 1,
        ..Default::default()
    };
    let store = Store::open(&tmp.path().join("test.db"), &config).expect("failed to open store");
    (store, tmp)
}
