use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    app::{context::RequestContext, errors::AppError},
    models::{ImportJob, JobStatus, UserId},
};

use super::Store;

const JOB_COLUMNS: &str = "id, user_id, source, import_option, file_path, status, total_items, \
     imported_count, error_message, created_at, started_at, completed_at";

fn job_from_row(row: &Row) -> rusqlite::Result<ImportJob> {
    Ok(ImportJob {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source: row.get(2)?,
        import_option: row.get(3)?,
        file_path: row.get(4)?,
        status: row.get(5)?,
        total_items: row.get(6)?,
        imported_count: row.get(7)?,
        error_message: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

impl Store {
    pub async fn create_job(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        source: &str,
        import_option: &str,
        file_path: &str,
    ) -> Result<ImportJob, AppError> {
        let id = rusty_ulid::generate_ulid_string().to_lowercase();
        let source = source.to_string();
        let import_option = import_option.to_string();
        let file_path = file_path.to_string();

        self.run(ctx, move |conn| {
            conn.execute(
                "INSERT INTO import_jobs (id, user_id, source, import_option, file_path, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, user_id, source, import_option, file_path, JobStatus::Pending, Utc::now()],
            )?;
            let sql = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], job_from_row)?)
        })
        .await
    }

    pub async fn get_job(&self, ctx: &RequestContext, id: &str) -> Result<ImportJob, AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let sql = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = ?1");
            conn.query_row(&sql, params![id], job_from_row)
                .optional()?
                .ok_or(AppError::NotFound)
        })
        .await
    }

    /// A user's jobs, newest first.
    pub async fn jobs_by_user(&self, ctx: &RequestContext, user_id: UserId) -> Result<Vec<ImportJob>, AppError> {
        self.run(ctx, move |conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM import_jobs WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map(params![user_id], job_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
        .await
    }

    /// Oldest pending jobs first.
    pub async fn pending_jobs(&self, ctx: &RequestContext, limit: usize) -> Result<Vec<ImportJob>, AppError> {
        self.run(ctx, move |conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM import_jobs WHERE status = ?1
                 ORDER BY created_at ASC, rowid ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map(params![JobStatus::Pending, limit as i64], job_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
        .await
    }

    /// Move a pending job to processing. Returns false when another worker
    /// got there first.
    pub async fn claim_job(&self, ctx: &RequestContext, id: &str) -> Result<bool, AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let claimed = conn.execute(
                "UPDATE import_jobs SET status = ?1, started_at = ?2 WHERE id = ?3 AND status = ?4",
                params![JobStatus::Processing, Utc::now(), id, JobStatus::Pending],
            )?;
            Ok(claimed == 1)
        })
        .await
    }

    /// Terminal statuses also stamp `completed_at`.
    pub async fn update_job_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            let completed_at = matches!(status, JobStatus::Completed | JobStatus::Failed).then(Utc::now);
            let updated = conn.execute(
                "UPDATE import_jobs SET status = ?2, error_message = COALESCE(?3, error_message),
                    completed_at = COALESCE(?4, completed_at)
                 WHERE id = ?1",
                params![id, status, error_message, completed_at],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn update_job_progress(
        &self,
        ctx: &RequestContext,
        id: &str,
        total_items: i64,
        imported_count: i64,
    ) -> Result<(), AppError> {
        let id = id.to_string();
        self.run(ctx, move |conn| {
            conn.execute(
                "UPDATE import_jobs SET total_items = ?2, imported_count = ?3 WHERE id = ?1",
                params![id, total_items, imported_count],
            )?;
            Ok(())
        })
        .await
    }

    /// Fail jobs stuck in processing since before `started_before`.
    pub async fn fail_stale_jobs(
        &self,
        ctx: &RequestContext,
        started_before: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        self.run(ctx, move |conn| {
            let failed = conn.execute(
                "UPDATE import_jobs SET status = ?1, error_message = 'interrupted', completed_at = ?2
                 WHERE status = ?3 AND (started_at IS NULL OR started_at < ?4)",
                params![JobStatus::Failed, Utc::now(), JobStatus::Processing, started_before],
            )?;
            Ok(failed)
        })
        .await
    }
}
