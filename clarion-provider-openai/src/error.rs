//! Internal error helpers for mapping HTTP/reqwest errors to [`ProviderError`].

use std::time::Duration;

use clarion_types::{ApiError, ProviderError};

/// Reported when a request times out without an explicit client timeout.
const DEFAULT_TIMEOUT_HINT: Duration = Duration::from_secs(30);

/// Map a non-success HTTP status to a [`ProviderError`].
///
/// 400-class rejections keep the decoded error body so tool-schema
/// rejections can be recognised from their structured fields.
pub(crate) fn map_http_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        429 => ProviderError::RateLimit {
            retry_after: parse_retry_after(body),
        },
        502..=504 => ProviderError::ServiceUnavailable(body.to_string()),
        code => ProviderError::Api(ApiError::from_body(Some(code), body)),
    }
}

/// Attempt to parse a retry delay from an error body.
///
/// Looks for "retry after <N>" or "try again in <N>s"; returns `None` if no
/// delay can be extracted.
fn parse_retry_after(body: &str) -> Option<Duration> {
    let lower = body.to_lowercase();
    ["retry after ", "try again in "].iter().find_map(|marker| {
        let idx = lower.find(marker)?;
        let after = &lower[idx + marker.len()..];
        let num_str: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        num_str.parse::<u64>().ok().map(Duration::from_secs)
    })
}

/// Map a [`reqwest::Error`] to a [`ProviderError`].
pub(crate) fn map_reqwest_error(err: reqwest::Error, timeout: Option<Duration>) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout.unwrap_or(DEFAULT_TIMEOUT_HINT))
    } else {
        ProviderError::Network(Box::new(err))
    }
}
