//! Tracker HTTP status classification.

use trackq_core::Error;

/// How a non-success tracker response should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerErrorCode {
    /// The endpoint does not exist on this deployment (404/405/410).
    EndpointUnsupported,
    /// Too many requests.
    RateLimited,
    /// Credentials missing or insufficient.
    Unauthorized,
    /// The tracker refused the request itself (bad filter, bad field).
    Rejected,
    /// Server-side failure.
    ServerError,
    /// Anything else.
    Unknown,
}

impl TrackerErrorCode {
    /// Determine the code from an HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 405 | 410 => Self::EndpointUnsupported,
            429 => Self::RateLimited,
            401 | 403 => Self::Unauthorized,
            400..=499 => Self::Rejected,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError)
    }
}

/// Convert a failed tracker response into a trackq error.
///
/// `body` is kept only for non-retryable rejections, which are logged in
/// full by callers.
pub fn to_trackq_error(code: TrackerErrorCode, status: u16, endpoint: &str, body: &str) -> Error {
    match code {
        TrackerErrorCode::EndpointUnsupported => Error::EndpointUnsupported {
            endpoint: endpoint.to_string(),
            status,
        },
        TrackerErrorCode::RateLimited => {
            Error::RateLimited(format!("{} returned {}", endpoint, status))
        }
        TrackerErrorCode::ServerError => {
            Error::UpstreamUnavailable(format!("{} returned {}", endpoint, status))
        }
        TrackerErrorCode::Unauthorized | TrackerErrorCode::Rejected => Error::UpstreamRejected {
            status,
            body: body.to_string(),
        },
        TrackerErrorCode::Unknown => {
            Error::Request(format!("{} returned unexpected status {}", endpoint, status))
        }
    }
}

/// Convert a transport failure (no HTTP response) into a trackq error.
///
/// Anything other than a malformed request is treated as a transient
/// network failure.
pub fn transport_error(endpoint: &str, e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::Request(format!("Failed to build request for {}: {}", endpoint, e))
    } else {
        Error::UpstreamUnavailable(format!("Request to {} failed: {}", endpoint, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackq_core::ErrorKind;

    #[test]
    fn test_code_from_404_405_410() {
        for status in [404, 405, 410] {
            assert_eq!(
                TrackerErrorCode::from_status(status),
                TrackerErrorCode::EndpointUnsupported
            );
        }
    }

    #[test]
    fn test_code_from_429() {
        assert_eq!(TrackerErrorCode::from_status(429), TrackerErrorCode::RateLimited);
    }

    #[test]
    fn test_code_from_400_and_401() {
        assert_eq!(TrackerErrorCode::from_status(400), TrackerErrorCode::Rejected);
        assert_eq!(TrackerErrorCode::from_status(401), TrackerErrorCode::Unauthorized);
    }

    #[test]
    fn test_code_from_5xx() {
        assert_eq!(TrackerErrorCode::from_status(500), TrackerErrorCode::ServerError);
        assert_eq!(TrackerErrorCode::from_status(503), TrackerErrorCode::ServerError);
    }

    #[test]
    fn test_code_from_unknown() {
        assert_eq!(TrackerErrorCode::from_status(302), TrackerErrorCode::Unknown);
    }

    #[test]
    fn test_retryable_only_rate_limit_and_server() {
        assert!(TrackerErrorCode::RateLimited.is_retryable());
        assert!(TrackerErrorCode::ServerError.is_retryable());
        assert!(!TrackerErrorCode::Rejected.is_retryable());
        assert!(!TrackerErrorCode::EndpointUnsupported.is_retryable());
        assert!(!TrackerErrorCode::Unauthorized.is_retryable());
    }

    #[test]
    fn test_conversion_agrees_with_retryability() {
        for status in [400, 401, 404, 429, 500, 503] {
            let code = TrackerErrorCode::from_status(status);
            let err = to_trackq_error(code, status, "/rest/api/3/search", "{}");
            assert_eq!(err.is_retryable(), code.is_retryable(), "status {}", status);
        }
    }

    #[test]
    fn test_rejection_keeps_body() {
        let err = to_trackq_error(
            TrackerErrorCode::Rejected,
            400,
            "/rest/api/3/search/jql",
            r#"{"errorMessages":["Field 'foo' does not exist"]}"#,
        );
        assert_eq!(err.kind(), Some(ErrorKind::UpstreamRejected));
        assert!(err.to_string().contains("Field 'foo'"));
    }
}
