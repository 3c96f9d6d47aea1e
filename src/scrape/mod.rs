//! Page fetching and article extraction.

pub mod readability;
pub mod sanitize;

use std::{error::Error, time::Duration};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::{app::context::RequestContext, app::errors::AppError, config::FetchConfig};

static META_REFRESH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+http-equiv=["']?refresh["']?[^>]+content=["']?\d+;\s*url=([^"'>]+)["']?"#)
        .expect("Failed to compile meta refresh regex")
});

/// Source of raw page HTML.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, ctx: &RequestContext, url: &str) -> Result<String, AppError>;
}

fn get_error(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

/// Target of a `<meta http-equiv="refresh">` tag, resolved against `base`.
pub fn meta_refresh_target(html: &str, base: &Url) -> Result<Option<Url>, AppError> {
    let Some(captures) = META_REFRESH_REGEX.captures(html) else {
        return Ok(None);
    };

    let target = captures[1].trim();
    let resolved = if target.starts_with('/') && !target.starts_with("//") {
        let host = base
            .host_str()
            .ok_or_else(|| AppError::Fetch(format!("{base}: missing host")))?;
        let origin = match base.port() {
            Some(port) => format!("{}://{host}:{port}", base.scheme()),
            None => format!("{}://{host}", base.scheme()),
        };
        Url::parse(&format!("{origin}{target}"))
    } else {
        base.join(target)
    };

    resolved
        .map(Some)
        .map_err(|err| AppError::Fetch(format!("unparseable refresh target {target:?}: {err}")))
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_meta_refresh: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::Fetch(get_error(&err)))?;

        Ok(Self {
            client,
            max_meta_refresh: config.max_meta_refresh,
        })
    }

    async fn get_page(&self, url: &Url) -> Result<String, AppError> {
        let iden = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        log::debug!("{iden}: requesting");

        let resp = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::UPGRADE_INSECURE_REQUESTS, "1")
            .send()
            .await
            .map_err(|err| {
                log::debug!("{iden}: {err}");
                AppError::Fetch(format!("{iden}: {}", get_error(&err)))
            })?;

        let status = resp.status();
        if !status.is_success() {
            log::debug!("{iden}: {status}");
            return Err(AppError::Fetch(format!("{iden}: status {status}")));
        }

        resp.text()
            .await
            .map_err(|err| AppError::Fetch(format!("{iden}: {}", get_error(&err))))
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, ctx: &RequestContext, url: &str) -> Result<String, AppError> {
        let mut current = Url::parse(url).map_err(|err| AppError::InvalidUrl(format!("{url}: {err}")))?;

        for _ in 0..=self.max_meta_refresh {
            let body = ctx.run(self.get_page(&current)).await?;

            match meta_refresh_target(&body, &current)? {
                Some(next) => {
                    log::debug!("following meta refresh {current} -> {next}");
                    current = next;
                }
                None => return Ok(body),
            }
        }

        Err(AppError::Fetch(format!(
            "{url}: more than {} meta refresh redirects",
            self.max_meta_refresh
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com:8443/articles/one?x=1").unwrap()
    }

    #[test]
    fn test_no_refresh() {
        let html = r#"<html><head><meta charset="utf-8"></head></html>"#;
        assert_eq!(meta_refresh_target(html, &base()).unwrap(), None);
    }

    #[test]
    fn test_absolute_refresh() {
        let html = r#"<meta http-equiv="refresh" content="0; url=https://other.example/final">"#;
        let target = meta_refresh_target(html, &base()).unwrap().unwrap();
        assert_eq!(target.as_str(), "https://other.example/final");
    }

    #[test]
    fn test_root_relative_refresh_uses_scheme_and_host() {
        let html = r#"<META HTTP-EQUIV=Refresh CONTENT="5;URL=/moved/here">"#;
        let target = meta_refresh_target(html, &base()).unwrap().unwrap();
        assert_eq!(target.as_str(), "https://example.com:8443/moved/here");
    }

    #[test]
    fn test_path_relative_refresh() {
        let html = r#"<meta http-equiv='refresh' content='0; url=two'>"#;
        let target = meta_refresh_target(html, &base()).unwrap().unwrap();
        assert_eq!(target.as_str(), "https://example.com:8443/articles/two");
    }

    #[test]
    fn test_unparseable_refresh() {
        let html = r#"<meta http-equiv="refresh" content="0; url=http://[::1">"#;
        assert!(matches!(
            meta_refresh_target(html, &base()),
            Err(AppError::Fetch(_))
        ));
    }
}
