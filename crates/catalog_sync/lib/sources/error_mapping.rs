use std::error::Error as StdError;

use crate::sync_service::types::{FetchError, FetchErrorKind};

pub(crate) fn map_status_to_fetch_error(resource: &str, status: u16) -> FetchError {
    match status {
        401 => FetchError::new(
            FetchErrorKind::Unauthorized,
            format!("unauthorized while fetching {resource}"),
        ),
        403 => FetchError::new(
            FetchErrorKind::Forbidden,
            format!("forbidden while fetching {resource}"),
        ),
        404 => FetchError::new(
            FetchErrorKind::Other,
            format!("not found while fetching {resource}"),
        ),
        408 | 425 | 429 => FetchError::new(
            FetchErrorKind::RateLimited,
            format!("throttled ({status}) while fetching {resource}"),
        ),
        400..=499 => FetchError::new(
            FetchErrorKind::Other,
            format!("upstream client error {status} while fetching {resource}"),
        ),
        500..=599 => FetchError::new(
            FetchErrorKind::UpstreamUnavailable,
            format!("upstream server error {status} while fetching {resource}"),
        ),
        _ => FetchError::new(
            FetchErrorKind::Other,
            format!("unexpected HTTP status {status} while fetching {resource}"),
        ),
    }
}

pub(crate) fn map_reqwest_error(resource: &str, err: reqwest::Error) -> FetchError {
    tracing::debug!(
        event = "provider_request_error_diagnostics",
        resource,
        reqwest_status = ?err.status().map(|status| status.as_u16()),
        reqwest_is_timeout = err.is_timeout(),
        reqwest_is_connect = err.is_connect(),
        reqwest_is_decode = err.is_decode(),
        reqwest_error_chain = %render_error_chain(&err),
        "captured reqwest diagnostics"
    );

    if let Some(status) = err.status() {
        return map_status_to_fetch_error(resource, status.as_u16());
    }

    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return FetchError::new(
            FetchErrorKind::Network,
            format!("network error while fetching {resource}: {err}"),
        );
    }

    if err.is_decode() {
        return FetchError::new(
            FetchErrorKind::MalformedResponse,
            format!("undecodable response while fetching {resource}: {err}"),
        );
    }

    FetchError::new(
        FetchErrorKind::Other,
        format!("request for {resource} failed: {err:#}"),
    )
}

pub(crate) fn map_json_error(resource: &str, err: serde_json::Error) -> FetchError {
    FetchError::new(
        FetchErrorKind::MalformedResponse,
        format!("invalid JSON from {resource}: {err}"),
    )
}

fn render_error_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(next) = source {
        parts.push(next.to_string());
        source = next.source();
    }
    parts.join(" | caused_by: ")
}

#[cfg(test)]
mod tests {
    use super::{map_json_error, map_status_to_fetch_error};
    use crate::sync_service::types::FetchErrorKind;

    #[test]
    fn auth_statuses_are_not_retryable() {
        let unauthorized = map_status_to_fetch_error("get_live_streams", 401);
        let forbidden = map_status_to_fetch_error("get_live_streams", 403);

        assert_eq!(unauthorized.kind, FetchErrorKind::Unauthorized);
        assert_eq!(forbidden.kind, FetchErrorKind::Forbidden);
        assert!(!unauthorized.is_retryable());
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(map_status_to_fetch_error("history", 429).is_retryable());
        assert!(map_status_to_fetch_error("history", 503).is_retryable());
        assert!(!map_status_to_fetch_error("history", 404).is_retryable());
    }

    #[test]
    fn json_errors_are_malformed_responses() {
        let err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        let mapped = map_json_error("get_series", err);
        assert_eq!(mapped.kind, FetchErrorKind::MalformedResponse);
        assert!(mapped.message.contains("get_series"));
    }
}
