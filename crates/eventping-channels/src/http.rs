//! Shared HTTP helpers for the REST-based adapters.

use std::time::Duration;

use reqwest::{header::RETRY_AFTER, Response, StatusCode};

use crate::error::ChannelError;

/// Build the client every HTTP adapter uses.
pub(crate) fn client() -> Result<reqwest::Client, ChannelError> {
    reqwest::Client::builder()
        .user_agent(concat!("EventPing/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ChannelError::ConfigError(format!("http client: {e}")))
}

/// Map a transport-level reqwest failure. These never reached the provider's
/// business logic, so they are always worth retrying.
pub(crate) fn classify_transport(err: reqwest::Error) -> ChannelError {
    if err.is_timeout() {
        ChannelError::Transient(format!("request timed out: {err}"))
    } else if err.is_connect() {
        ChannelError::ConnectionFailed(err.to_string())
    } else {
        ChannelError::Transient(err.to_string())
    }
}

/// Turn a non-success response into a classified error, consuming the body
/// for the error message.
pub(crate) async fn error_from_response(resp: Response) -> ChannelError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = resp.text().await.unwrap_or_default();
    classify_status(status, &body, retry_after)
}

/// 408/429/5xx retry; 401 is an auth failure; other 4xx are terminal.
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after_secs: Option<u64>,
) -> ChannelError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", truncate(body, 300))
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChannelError::RateLimited { retry_after_secs },
        StatusCode::REQUEST_TIMEOUT => ChannelError::Transient(detail),
        StatusCode::UNAUTHORIZED => ChannelError::AuthFailed(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE => ChannelError::InvalidRecipient(detail),
        s if s.is_server_error() => ChannelError::Transient(detail),
        _ => ChannelError::Rejected(detail),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Accept `+15551234567`, `1 555 123 4567` etc.; return the digits with an
/// optional leading `+`, or `None` when it is not 10–15 digits.
pub(crate) fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    let valid = (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    valid.then_some(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "", None).is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "", None).is_retryable());
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "", Some(7)),
            ChannelError::RateLimited { retry_after_secs: Some(7) }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad token", None),
            ChannelError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "", None),
            ChannelError::InvalidRecipient(_)
        ));
        assert!(!classify_status(StatusCode::BAD_REQUEST, "{}", None).is_retryable());
        assert!(!classify_status(StatusCode::FORBIDDEN, "", None).is_retryable());
    }

    #[test]
    fn phone_normalisation() {
        assert_eq!(normalize_phone("+1 555 123 4567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("447700900123").as_deref(), Some("447700900123"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("+1-555-123-4567"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        assert_eq!(truncate(&s, 5).len(), 4);
    }
}
