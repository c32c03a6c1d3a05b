//! Fetch errors

use std::time::Duration;
use thiserror::Error;
use vulnkb_core::{Classify, ErrorKind, GuardError};

/// Failure of a single feed request attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// The feed answered 429
    #[error("rate limited by feed (retry after {retry_after:?})")]
    RateLimited {
        /// Server hint from the Retry-After header
        retry_after: Option<Duration>,
    },

    /// Non-success status other than rate limiting
    #[error("feed returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Identity assigned by the status classifier
        kind: Option<ErrorKind>,
    },

    /// The request did not complete in time
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The body exceeded the response guard
    #[error(transparent)]
    TooLarge(#[from] GuardError),

    /// The body was not valid JSON
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl Classify for FetchError {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::RateLimited { .. } => Some(ErrorKind::RATE_LIMITED),
            Self::Status { kind, .. } => kind.clone(),
            Self::Timeout => Some(ErrorKind::TIMEOUT),
            Self::Connection(_) => Some(ErrorKind::CONNECTION),
            Self::Transport(_) | Self::TooLarge(_) | Self::Decode(_) => None,
        }
    }
}
