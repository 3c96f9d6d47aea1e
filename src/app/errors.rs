use axum::extract::rejection::{JsonRejection, QueryRejection};

use crate::semantic::embeddings::EmbeddingError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("bookmark not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("this feature requires a verified premium account")]
    PremiumRequired,

    #[error("unverified accounts can save at most {0} bookmarks, please verify your email")]
    UnverifiedLimitExceeded(i64),

    #[error("daily limit of {0} bookmarks reached")]
    DailyLimitExceeded(i64),

    #[error("daily limit of {0} AI questions reached")]
    AIQuotaExceeded(i64),

    #[error("bookmark with this link already exists")]
    DuplicateItem,

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("ai error: {0}")]
    AI(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Wire code used in the `{errorCode, errorMessage}` envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "INVALID_REQUEST",
            AppError::InvalidUrl(_) => "INVALID_URL",
            AppError::NotFound => "NOT_FOUND",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::PremiumRequired => "PREMIUM_REQUIRED",
            AppError::UnverifiedLimitExceeded(_) => "UNVERIFIED_USER_LIMIT_EXCEEDED",
            AppError::DailyLimitExceeded(_) => "DAILY_LIMIT_EXCEEDED",
            AppError::AIQuotaExceeded(_) => "AI_QUOTA_EXCEEDED",
            AppError::Cancelled => "REQUEST_CANCELLED",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) | AppError::InvalidUrl(_) => 400,
            AppError::Unauthorized => 401,
            AppError::PremiumRequired | AppError::UnverifiedLimitExceeded(_) => 403,
            AppError::NotFound => 404,
            AppError::DailyLimitExceeded(_) | AppError::AIQuotaExceeded(_) => 429,
            AppError::Cancelled => 499,
            _ => 500,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
            err => AppError::Storage(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::Storage(format!("connection pool: {err}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}
