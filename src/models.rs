use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Sum type persisted as a fixed lowercase string.
macro_rules! persisted_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|err: UnknownVariant| FromSqlError::Other(Box::new(err)))
            }
        }
    };
}

/// Where a bookmark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Web,
    Telegram,
    Api,
    Pocket,
}

persisted_enum!(Source, "source", {
    Web => "web",
    Telegram => "telegram",
    Api => "api",
    Pocket => "pocket",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

persisted_enum!(JobStatus, "job status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthTokenType {
    Signup,
    Signin,
    EmailVerification,
}

persisted_enum!(AuthTokenType, "auth token type", {
    Signup => "signup",
    Signin => "signin",
    EmailVerification => "email_verification",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Free,
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
}

persisted_enum!(SubscriptionStatus, "subscription status", {
    Free => "free",
    Active => "active",
    Trialing => "trialing",
    PastDue => "past_due",
    Canceled => "canceled",
    Unpaid => "unpaid",
    Incomplete => "incomplete",
    IncompleteExpired => "incomplete_expired",
});

impl SubscriptionStatus {
    pub fn is_premium(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub email_verified: bool,
    pub subscription_status: SubscriptionStatus,
}

impl User {
    pub fn is_premium(&self) -> bool {
        self.subscription_status.is_premium()
    }
}

/// A saved bookmark joined with the metadata kept alongside its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub link: String,
    pub source: Source,
    pub excerpt: String,
    pub image_url: String,
    pub site_name: String,
    pub article_lang: String,
    pub published_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub ai_summary: Option<String>,
    pub ai_excerpt: Option<String>,
    pub ai_tags: Option<String>,
}

/// Item together with its content row.
#[derive(Debug, Clone, PartialEq)]
pub struct FullBookmark {
    pub item: Item,
    pub content: String,
    pub ai_markdown: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Fields produced by article extraction, either server-side or by a client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub text: String,
    pub excerpt: String,
    pub image_url: String,
    pub lang: String,
    pub site_name: String,
    pub published_time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub user_id: UserId,
    pub source: Source,
    pub link: String,
    pub title: String,
    pub excerpt: String,
    pub image_url: String,
    pub site_name: String,
    pub article_lang: String,
    pub published_time: Option<DateTime<Utc>>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiFields {
    pub markdown: String,
    pub summary: String,
    pub excerpt: String,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub headline: String,
    pub id: String,
    pub title: String,
    pub link: String,
    pub excerpt: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub rank: f64,
    pub ai_summary: Option<String>,
    pub ai_excerpt: Option<String>,
    pub ai_tags: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub item: Item,
    /// `1 - cosine distance`
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportJob {
    pub id: String,
    pub user_id: UserId,
    pub source: String,
    pub import_option: String,
    pub file_path: String,
    pub status: JobStatus,
    pub total_items: i64,
    pub imported_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_strings() {
        assert_eq!(Source::Pocket.as_str(), "pocket");
        assert_eq!("telegram".parse::<Source>().unwrap(), Source::Telegram);
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(
            "email_verification".parse::<AuthTokenType>().unwrap(),
            AuthTokenType::EmailVerification
        );
        assert_eq!(
            "incomplete_expired".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::IncompleteExpired
        );
        assert!("Web".parse::<Source>().is_err());
    }

    #[test]
    fn test_premium_tiers() {
        let premium = [SubscriptionStatus::Active, SubscriptionStatus::Trialing];
        for status in premium {
            assert!(status.is_premium());
        }

        for status in [
            SubscriptionStatus::Free,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
        ] {
            assert!(!status.is_premium(), "{status} should not be premium");
        }
    }
}
