//! Error identities and transport signal classification
//!
//! Retryability is decided by membership: an operation error reports an
//! [`ErrorKind`] through [`Classify`], and the retry executor checks that kind
//! against the configured retryable set. Mapping a transport signal (an HTTP
//! status, say) onto a kind is the job of a [`SignalClassifier`], which lives
//! with the transport and never with the executor.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A distinguished error identity.
///
/// Two kinds are equal when their names are equal. The well-known kinds are
/// provided as constants; callers can mint their own with [`ErrorKind::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorKind(Cow<'static, str>);

impl ErrorKind {
    /// Remote asked the caller to slow down (HTTP 429)
    pub const RATE_LIMITED: ErrorKind = ErrorKind(Cow::Borrowed("rate_limited"));
    /// Remote is temporarily unable to serve (HTTP 502/503/504)
    pub const SERVICE_UNAVAILABLE: ErrorKind = ErrorKind(Cow::Borrowed("service_unavailable"));
    /// Attempt did not complete in time
    pub const TIMEOUT: ErrorKind = ErrorKind(Cow::Borrowed("timeout"));
    /// Connection could not be established or was reset
    pub const CONNECTION: ErrorKind = ErrorKind(Cow::Borrowed("connection"));

    /// Create a caller-defined error kind
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The identity name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ErrorKind {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

/// Implemented by operation errors so the executor can look up their identity.
///
/// Wrapper errors should delegate to the error they wrap.
pub trait Classify {
    /// The identity of this error, if it has one
    fn kind(&self) -> Option<ErrorKind>;
}

impl Classify for ErrorKind {
    fn kind(&self) -> Option<ErrorKind> {
        Some(self.clone())
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn kind(&self) -> Option<ErrorKind> {
        (**self).kind()
    }
}

/// Maps a transport-specific signal onto an [`ErrorKind`].
pub trait SignalClassifier: Send + Sync {
    /// The transport signal, e.g. an HTTP status code
    type Signal: ?Sized;

    /// Classify a signal; `None` means the signal carries no error identity
    fn classify(&self, signal: &Self::Signal) -> Option<ErrorKind>;
}

/// Classifier for HTTP status codes.
#[derive(Debug, Clone)]
pub struct HttpStatusClassifier {
    rate_limited: Vec<u16>,
    unavailable: Vec<u16>,
}

impl Default for HttpStatusClassifier {
    fn default() -> Self {
        Self {
            rate_limited: vec![429],
            unavailable: vec![502, 503, 504],
        }
    }
}

impl HttpStatusClassifier {
    /// Create a classifier with the default status mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only treat rate limiting as a classified signal
    #[must_use]
    pub fn rate_limit_only() -> Self {
        Self {
            rate_limited: vec![429],
            unavailable: Vec::new(),
        }
    }

    /// Add a status that should map to [`ErrorKind::RATE_LIMITED`]
    #[must_use]
    pub fn with_rate_limit_status(mut self, status: u16) -> Self {
        if !self.rate_limited.contains(&status) {
            self.rate_limited.push(status);
        }
        self
    }

    /// Add a status that should map to [`ErrorKind::SERVICE_UNAVAILABLE`]
    #[must_use]
    pub fn with_unavailable_status(mut self, status: u16) -> Self {
        if !self.unavailable.contains(&status) {
            self.unavailable.push(status);
        }
        self
    }
}

impl SignalClassifier for HttpStatusClassifier {
    type Signal = u16;

    fn classify(&self, status: &u16) -> Option<ErrorKind> {
        if self.rate_limited.contains(status) {
            Some(ErrorKind::RATE_LIMITED)
        } else if self.unavailable.contains(status) {
            Some(ErrorKind::SERVICE_UNAVAILABLE)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_compare_by_name() {
        assert_eq!(ErrorKind::new("rate_limited"), ErrorKind::RATE_LIMITED);
        assert_ne!(ErrorKind::TIMEOUT, ErrorKind::CONNECTION);
        assert_eq!(ErrorKind::from("timeout"), ErrorKind::TIMEOUT);
    }

    #[test]
    fn test_kind_serde_as_plain_string() {
        let json = serde_json::to_string(&ErrorKind::RATE_LIMITED).unwrap();
        assert_eq!(json, "\"rate_limited\"");

        let kind: ErrorKind = serde_json::from_str("\"quota_exhausted\"").unwrap();
        assert_eq!(kind, ErrorKind::new("quota_exhausted"));
    }

    #[test]
    fn test_http_classifier_defaults() {
        let classifier = HttpStatusClassifier::new();
        assert_eq!(classifier.classify(&429), Some(ErrorKind::RATE_LIMITED));
        assert_eq!(
            classifier.classify(&503),
            Some(ErrorKind::SERVICE_UNAVAILABLE)
        );
        assert_eq!(classifier.classify(&404), None);
        assert_eq!(classifier.classify(&200), None);
    }

    #[test]
    fn test_http_classifier_rate_limit_only() {
        let classifier = HttpStatusClassifier::rate_limit_only().with_rate_limit_status(420);
        assert_eq!(classifier.classify(&420), Some(ErrorKind::RATE_LIMITED));
        assert_eq!(classifier.classify(&503), None);
    }
}
