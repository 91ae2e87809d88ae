//! Error types for trackq.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using trackq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing error classification carried in a `ProcessResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// More than one equally valid entity matched a mention.
    AmbiguousEntity,
    /// No template, no entity, or no records after every fallback.
    NoMatch,
    /// The tracker refused the request (4xx other than rate limiting).
    UpstreamRejected,
    /// The tracker was unreachable after the retry budget was spent.
    UpstreamUnavailable,
    /// Returned records did not match the resolved filter.
    ValidationMismatch,
}

impl ErrorKind {
    /// Stable string form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmbiguousEntity => "ambiguous_entity",
            Self::NoMatch => "no_match",
            Self::UpstreamRejected => "upstream_rejected",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::ValidationMismatch => "validation_mismatch",
        }
    }
}

/// Core error type for trackq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A mention resolved to several equally valid candidates.
    #[error("Ambiguous entity '{mention}': {} candidates", candidates.len())]
    AmbiguousEntity {
        mention: String,
        candidates: Vec<String>,
    },

    /// Nothing matched (template, entity, or records).
    #[error("No match: {0}")]
    NoMatch(String),

    /// Tracker answered with a non-retryable 4xx.
    #[error("Upstream rejected request ({status}): {body}")]
    UpstreamRejected { status: u16, body: String },

    /// Tracker answered 5xx or the network failed.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Tracker answered 429.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The endpoint does not exist on this tracker deployment (404/405/410).
    #[error("Endpoint unsupported ({status}): {endpoint}")]
    EndpointUnsupported { endpoint: String, status: u16 },

    /// Records returned by the tracker disagree with the resolved filter.
    #[error("Validation mismatch: {0}")]
    ValidationMismatch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request could not be built or sent
    #[error("Request error: {0}")]
    Request(String),

    /// Text generation failed
    #[error("Generation error: {0}")]
    Generation(String),

    /// The caller went away before the work finished.
    #[error("Cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may succeed if attempted again.
    ///
    /// Only server-side failures and rate limiting qualify. A 4xx is a
    /// property of the request and never changes on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::RateLimited(_))
    }

    /// Map to the user-facing classification, if there is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::AmbiguousEntity { .. } => Some(ErrorKind::AmbiguousEntity),
            Self::NoMatch(_) => Some(ErrorKind::NoMatch),
            Self::UpstreamRejected { .. } | Self::EndpointUnsupported { .. } => {
                Some(ErrorKind::UpstreamRejected)
            }
            Self::UpstreamUnavailable(_) | Self::RateLimited(_) | Self::Request(_) => {
                Some(ErrorKind::UpstreamUnavailable)
            }
            Self::ValidationMismatch(_) => Some(ErrorKind::ValidationMismatch),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Connect and timeout failures are transient from the caller's view.
        if e.is_connect() || e.is_timeout() {
            Error::UpstreamUnavailable(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_no_match() {
        let err = Error::NoMatch("no template".to_string());
        assert_eq!(err.to_string(), "No match: no template");
    }

    #[test]
    fn test_error_display_ambiguous() {
        let err = Error::AmbiguousEntity {
            mention: "Ashwin".to_string(),
            candidates: vec!["Ashwin Kumar".to_string(), "Ashwin Thyagarajan".to_string()],
        };
        assert_eq!(err.to_string(), "Ambiguous entity 'Ashwin': 2 candidates");
    }

    #[test]
    fn test_error_display_rejected() {
        let err = Error::UpstreamRejected {
            status: 400,
            body: "bad jql".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream rejected request (400): bad jql");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamUnavailable("503".into()).is_retryable());
        assert!(Error::RateLimited("slow down".into()).is_retryable());
        assert!(!Error::UpstreamRejected {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!Error::EndpointUnsupported {
            endpoint: "/rest/api/3/search/jql".into(),
            status: 404
        }
        .is_retryable());
        assert!(!Error::NoMatch("x".into()).is_retryable());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::NoMatch("x".into()).kind(),
            Some(ErrorKind::NoMatch)
        );
        assert_eq!(
            Error::RateLimited("x".into()).kind(),
            Some(ErrorKind::UpstreamUnavailable)
        );
        assert_eq!(
            Error::ValidationMismatch("x".into()).kind(),
            Some(ErrorKind::ValidationMismatch)
        );
        assert_eq!(Error::Internal("x".into()).kind(), None);
        assert_eq!(Error::Cancelled.kind(), None);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AmbiguousEntity).unwrap();
        assert_eq!(json, "\"ambiguous_entity\"");
        assert_eq!(ErrorKind::UpstreamRejected.as_str(), "upstream_rejected");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
