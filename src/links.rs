use url::Url;

use crate::app::errors::AppError;

/// Longest link accepted anywhere in the system
pub const MAX_URL_LENGTH: usize = 2048;

/// Canonical form of a link, used as the per-user deduplication key.
///
/// Applies the following transformations:
/// - Forces the `https` scheme (`http` and protocol-relative links)
/// - Lowercases the hostname
/// - Removes trailing slashes from the path (preserves root `/`)
/// - Sorts query parameters by key, keeping the order of repeated keys
///
/// Fails with `InvalidUrl` if the link cannot be parsed or is not http(s).
pub fn canonicalize(link: &str) -> Result<String, AppError> {
    let link = link.trim();

    // Handle protocol-relative URLs
    let url_to_parse = if link.starts_with("//") {
        format!("https:{}", link)
    } else {
        link.to_string()
    };

    let mut parsed =
        Url::parse(&url_to_parse).map_err(|err| AppError::InvalidUrl(format!("{link}: {err}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" => {
            parsed
                .set_scheme("https")
                .map_err(|_| AppError::InvalidUrl(link.to_string()))?;
        }
        other => {
            return Err(AppError::InvalidUrl(format!(
                "{link}: unsupported scheme {other}"
            )))
        }
    }

    let host = match parsed.host_str() {
        Some(host) if !host.is_empty() => host.to_lowercase(),
        _ => return Err(AppError::InvalidUrl(format!("{link}: missing host"))),
    };
    parsed
        .set_host(Some(&host))
        .map_err(|err| AppError::InvalidUrl(format!("{link}: {err}")))?;

    // rebuild query string with sorted keys
    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed.set_query(None);
    if !params.is_empty() {
        params.sort_by(|a, b| a.0.cmp(&b.0));
        parsed.query_pairs_mut().extend_pairs(params);
    }

    // Strip trailing slashes from path (but keep root `/`)
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        parsed.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }

    Ok(parsed.to_string())
}

/// Accepts non-empty http(s) links with a host, at most `MAX_URL_LENGTH` bytes.
pub fn is_url_valid(link: &str) -> bool {
    if link.is_empty() || link.len() > MAX_URL_LENGTH {
        return false;
    }

    match Url::parse(link) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().map(|h| !h.is_empty()).unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// Host of a link without a leading `www.`, empty if unparseable.
pub fn hostname(link: &str) -> String {
    Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}
