//! Pocket export import and export.
//!
//! A Pocket export is a ZIP archive whose `part_000000.csv` lists one saved
//! link per row. Rows are re-ingested through the normal save path.

use std::{
    fs::File,
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

use crate::{
    app::{context::RequestContext, errors::AppError, orchestrator::Ingestor},
    links,
    models::{ImportJob, Item, JobStatus, Source, UserId},
    store::Store,
};

pub const POCKET_SOURCE: &str = "pocket";
pub const IMPORT_OPTIONS: &[&str] = &["all", "highlighted"];
pub const EXPORT_CSV_NAME: &str = "part_000000.csv";

const ARCHIVED_STATUS: &str = "archive";
const PROGRESS_EVERY: i64 = 10;
const MAX_CSV_BYTES: u64 = 512 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("unsupported import source")]
    UnsupportedSource(String),

    #[error("open zip file: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("part_000000.csv not found in ZIP file")]
    MissingCsv,

    #[error("required columns not found in CSV (url, title, time_added, status)")]
    MissingColumns,

    #[error("CSV file exceeds {0} bytes")]
    TooLarge(u64),

    #[error("read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        AppError::Other(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PocketRow {
    pub url: String,
    pub title: String,
    pub time_added: DateTime<Utc>,
    pub status: String,
}

impl PocketRow {
    pub fn should_import(&self) -> bool {
        self.status == ARCHIVED_STATUS && links::is_url_valid(&self.url)
    }
}

/// Where an uploaded export for `user_id` is kept until the job runs.
pub fn upload_path(uploads_dir: &Path, user_id: UserId, source: &str) -> PathBuf {
    uploads_dir.join("imports").join(format!("{user_id}_{source}.zip"))
}

/// Stream the rows of the Pocket CSV inside the ZIP at `path` into `visit`,
/// which returns false to stop reading. Returns the number of rows visited.
pub fn read_pocket_export(
    path: &Path,
    max_csv_bytes: u64,
    visit: impl FnMut(PocketRow) -> bool,
) -> Result<usize, ImportError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    let index = (0..archive.len())
        .find(|&i| {
            archive
                .name_for_index(i)
                .is_some_and(|name| name.to_lowercase().ends_with(EXPORT_CSV_NAME))
        })
        .ok_or(ImportError::MissingCsv)?;

    let entry = archive.by_index(index)?;
    if entry.size() > max_csv_bytes {
        return Err(ImportError::TooLarge(max_csv_bytes));
    }
    parse_pocket_csv(entry.take(max_csv_bytes), visit)
}

pub fn parse_pocket_csv<R: Read>(reader: R, mut visit: impl FnMut(PocketRow) -> bool) -> Result<usize, ImportError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let column = |headers: &csv::StringRecord, name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let headers = reader.headers()?.clone();
    let (Some(url), Some(title), Some(time_added), Some(status)) = (
        column(&headers, "url"),
        column(&headers, "title"),
        column(&headers, "time_added"),
        column(&headers, "status"),
    ) else {
        return Err(ImportError::MissingColumns);
    };

    let mut visited = 0;
    let mut record = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) if matches!(err.kind(), csv::ErrorKind::Utf8 { .. }) => {
                log::warn!("skipping unreadable CSV record: {err}");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        let field = |i: usize| record.get(i).unwrap_or_default().trim().to_string();

        let time_added = field(time_added)
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        visited += 1;
        let row = PocketRow {
            url: field(url),
            title: field(title),
            time_added,
            status: field(status),
        };
        if !visit(row) {
            break;
        }
    }

    Ok(visited)
}

/// ZIP archive in the Pocket export layout, re-importable by the worker.
pub fn export_pocket_zip(items: &[Item]) -> Result<Vec<u8>, ImportError> {
    let mut csv_writer = csv::Writer::from_writer(Vec::new());
    csv_writer.write_record(["url", "title", "time_added", "status"])?;
    for item in items {
        csv_writer.write_record([
            item.link.as_str(),
            item.title.as_str(),
            &item.created_at.timestamp().to_string(),
            ARCHIVED_STATUS,
        ])?;
    }
    let csv_data = csv_writer
        .into_inner()
        .map_err(|err| ImportError::Io(err.into_error()))?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(EXPORT_CSV_NAME, SimpleFileOptions::default())?;
    zip.write_all(&csv_data)?;
    Ok(zip.finish()?.into_inner())
}

/// Runs one claimed import job to completion.
#[derive(Clone)]
pub struct ImportProcessor {
    store: Store,
    ingestor: Ingestor,
}

impl ImportProcessor {
    pub fn new(store: Store, ingestor: Ingestor) -> Self {
        Self { store, ingestor }
    }

    /// Claim `job` and process it, recording the outcome on the job row.
    /// Returns false when another worker claimed it first.
    pub async fn run_job(&self, ctx: &RequestContext, job: &ImportJob) -> Result<bool, AppError> {
        if !self.store.claim_job(ctx, &job.id).await? {
            log::debug!("import job {} already claimed", job.id);
            return Ok(false);
        }
        log::info!("processing import job {} ({}) for user {}", job.id, job.source, job.user_id);

        let (status, message) = match self.process(ctx, job).await {
            Ok(imported) => {
                log::info!("import job {} completed, {imported} rows", job.id);
                (JobStatus::Completed, None)
            }
            Err(err) => {
                log::error!("import job {} failed: {err}", job.id);
                (JobStatus::Failed, Some(job_error_message(&err)))
            }
        };

        // the outcome is recorded even when the run was cancelled
        let record_ctx = RequestContext::anonymous();
        self.store
            .update_job_status(&record_ctx, &job.id, status, message)
            .await?;
        Ok(true)
    }

    async fn process(&self, ctx: &RequestContext, job: &ImportJob) -> Result<i64, AppError> {
        if job.source != POCKET_SOURCE {
            return Err(ImportError::UnsupportedSource(job.source.clone()).into());
        }

        let user = self.store.get_user(ctx, job.user_id).await?;
        if job.import_option != "all" {
            log::debug!("import option {} imports every row", job.import_option);
        }

        // rows are parsed on the blocking pool and ingested as they arrive
        let path = PathBuf::from(&job.file_path);
        let (tx, mut rx) = mpsc::channel::<PocketRow>(PROGRESS_EVERY as usize);
        let reader = tokio::task::spawn_blocking(move || {
            read_pocket_export(&path, MAX_CSV_BYTES, |row| tx.blocking_send(row).is_ok())
        });

        let mut total = 0i64;
        let mut imported = 0i64;
        loop {
            let row = tokio::select! {
                _ = ctx.token().cancelled() => return Err(AppError::Cancelled),
                row = rx.recv() => row,
            };
            let Some(row) = row else { break };
            total += 1;

            if row.should_import() {
                if let Err(err) = self.ingestor.create(ctx, &user, &row.url, Source::Pocket).await {
                    if matches!(err, AppError::Cancelled) {
                        return Err(err);
                    }
                    log::warn!("import job {}: skipping {}: {err}", job.id, row.url);
                }
            } else {
                log::debug!("import job {}: skipping {} ({})", job.id, row.url, row.status);
            }
            imported += 1;

            if imported % PROGRESS_EVERY == 0 {
                self.store.update_job_progress(ctx, &job.id, total, imported).await?;
            }
        }

        reader
            .await
            .map_err(|err| AppError::Other(anyhow::anyhow!("import reader task failed: {err}")))??;
        self.store.update_job_progress(ctx, &job.id, total, imported).await?;
        Ok(imported)
    }
}

/// Message stored on a failed job.
fn job_error_message(err: &AppError) -> String {
    match err {
        AppError::Other(err) => match err.downcast_ref::<ImportError>() {
            Some(import_err) => import_err.to_string(),
            None => err.to_string(),
        },
        AppError::Cancelled => "interrupted".to_string(),
        err => err.to_string(),
    }
}
