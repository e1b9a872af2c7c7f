use std::time::Duration;

use crate::{Classified, ErrorKind};

/// How long to wait after a rate-limit response that did not say how long to wait.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// The longest `Retry-After` that is honoured.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// A failed request to the bank's API.
///
/// The bearer token is never part of an error message.
#[derive(Debug, thiserror::Error, PartialEq, Clone)]
pub enum ApiError {
    /// The access token was rejected (HTTP 401 or 403).
    ///
    /// Retrying with the same token cannot succeed.
    #[error("the bank rejected the access token (HTTP {0})")]
    Auth(u16),

    /// Too many requests were made (HTTP 429).
    #[error("rate limited by the bank, retry after {retry_after:?}")]
    RateLimited {
        /// How long the bank asked the client to wait.
        retry_after: Duration,
    },

    /// The resource does not exist at the bank (HTTP 404).
    #[error("the requested resource does not exist at the bank")]
    NotFound,

    /// The bank had an internal error (HTTP 5xx).
    #[error("the bank returned a server error (HTTP {0})")]
    Server(u16),

    /// The request could not be sent or the response could not be read.
    #[error("could not connect to the bank: {0}")]
    Connection(String),

    /// The request took longer than the configured timeout.
    #[error("the request to the bank timed out")]
    Timeout,

    /// The response body was not the expected JSON.
    #[error("could not parse the bank's response: {0}")]
    MalformedResponse(String),

    /// Any other non-success status code.
    #[error("the bank returned an unexpected status (HTTP {0})")]
    UnexpectedStatus(u16),
}

impl ApiError {
    /// Classify an HTTP status code, returning `None` for success codes.
    ///
    /// `retry_after` is the raw `Retry-After` header, if the response had one.
    pub fn from_status(status: u16, retry_after: Option<&str>) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(ApiError::Auth(status)),
            404 => Some(ApiError::NotFound),
            429 => Some(ApiError::RateLimited {
                retry_after: parse_retry_after(retry_after),
            }),
            500..=599 => Some(ApiError::Server(status)),
            _ => Some(ApiError::UnexpectedStatus(status)),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout
        } else if error.is_decode() {
            ApiError::MalformedResponse(error.to_string())
        } else {
            ApiError::Connection(error.without_url().to_string())
        }
    }
}

impl Classified for ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Auth(_) => ErrorKind::Auth,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::NotFound => ErrorKind::NotFound,
            ApiError::Server(_) => ErrorKind::Server,
            ApiError::Connection(_) => ErrorKind::Connection,
            ApiError::Timeout => ErrorKind::Timeout,
            ApiError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            ApiError::UnexpectedStatus(_) => ErrorKind::UnexpectedStatus,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// Missing, negative or unparsable values fall back to [DEFAULT_RETRY_AFTER].
pub fn parse_retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
        .map(|duration| duration.min(MAX_RETRY_AFTER))
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
