//! Response size guard
//!
//! Caps how many bytes of a remote response are buffered. Reading stops one
//! byte past the limit, so an oversized body fails fast with
//! [`GuardError::ResponseTooLarge`] instead of being held in memory. A body of
//! exactly the limit is accepted.

use std::io::Read;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Default response cap (10 MiB)
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Response guard errors
#[derive(Debug, Error)]
pub enum GuardError {
    /// The response is larger than the configured cap
    #[error("response too large: exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Configured cap in bytes
        limit: usize,
    },

    /// The underlying stream failed
    #[error("failed to read response: {0}")]
    Io(#[from] std::io::Error),
}

/// Size cap applied to response bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseGuard {
    max_response_size: usize,
}

impl Default for ResponseGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESPONSE_SIZE)
    }
}

impl ResponseGuard {
    /// Create a guard with the given cap in bytes
    #[must_use]
    pub fn new(max_response_size: usize) -> Self {
        Self { max_response_size }
    }

    /// The cap in bytes
    #[must_use]
    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    /// Reject a declared length (e.g. Content-Length) before reading
    pub fn check_declared_length(&self, declared: Option<u64>) -> Result<(), GuardError> {
        check_declared_length(declared, self.max_response_size)
    }

    /// Read an async stream to the end, up to the cap
    pub async fn read<R: AsyncRead + Unpin>(&self, reader: R) -> Result<Vec<u8>, GuardError> {
        read_limited(reader, self.max_response_size).await
    }

    /// Read a blocking stream to the end, up to the cap
    pub fn read_sync<R: Read>(&self, reader: R) -> Result<Vec<u8>, GuardError> {
        read_limited_sync(reader, self.max_response_size)
    }

    /// Start an incremental accumulator for chunked bodies
    #[must_use]
    pub fn limiter(&self) -> BodyLimiter {
        BodyLimiter {
            buf: Vec::new(),
            limit: self.max_response_size,
        }
    }
}

/// Fails when `declared` is over `limit`; unknown lengths pass
pub fn check_declared_length(declared: Option<u64>, limit: usize) -> Result<(), GuardError> {
    match declared {
        Some(len) if len > limit as u64 => {
            warn!(declared = len, limit = limit, "Declared response length over limit");
            Err(GuardError::ResponseTooLarge { limit })
        }
        _ => Ok(()),
    }
}

/// Read at most `limit` bytes from `reader`
pub async fn read_limited<R: AsyncRead + Unpin>(
    reader: R,
    limit: usize,
) -> Result<Vec<u8>, GuardError> {
    let mut buf = Vec::new();
    reader.take(probe_len(limit)).read_to_end(&mut buf).await?;
    finish(buf, limit)
}

/// Blocking counterpart of [`read_limited`]
pub fn read_limited_sync<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, GuardError> {
    let mut buf = Vec::new();
    reader.take(probe_len(limit)).read_to_end(&mut buf)?;
    finish(buf, limit)
}

fn probe_len(limit: usize) -> u64 {
    (limit as u64).saturating_add(1)
}

fn finish(buf: Vec<u8>, limit: usize) -> Result<Vec<u8>, GuardError> {
    if buf.len() > limit {
        warn!(limit = limit, "Response exceeded size limit");
        return Err(GuardError::ResponseTooLarge { limit });
    }
    Ok(buf)
}

/// Accumulates body chunks, failing as soon as the total passes the cap
#[derive(Debug)]
pub struct BodyLimiter {
    buf: Vec<u8>,
    limit: usize,
}

impl BodyLimiter {
    /// Append a chunk
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), GuardError> {
        if self.buf.len().saturating_add(chunk.len()) > self.limit {
            warn!(limit = self.limit, "Response exceeded size limit");
            return Err(GuardError::ResponseTooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Bytes accepted so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The accepted body
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    #[tokio::test]
    async fn test_exact_limit_succeeds() {
        let body = vec![b'a'; LIMIT];
        let read = read_limited(body.as_slice(), LIMIT).await.unwrap();
        assert_eq!(read.len(), LIMIT);
    }

    #[tokio::test]
    async fn test_one_past_limit_fails() {
        let body = vec![b'a'; LIMIT + 1];
        let err = read_limited(body.as_slice(), LIMIT).await.unwrap_err();
        assert!(matches!(err, GuardError::ResponseTooLarge { limit: LIMIT }));
    }

    #[tokio::test]
    async fn test_stops_reading_past_limit() {
        // An endless stream still terminates
        let err = ResponseGuard::new(LIMIT)
            .read(tokio::io::repeat(b'x'))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::ResponseTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_chunked_stream_boundaries() {
        let stream = || {
            tokio_test::io::Builder::new()
                .read(b"hello")
                .read(b"world")
                .build()
        };

        assert_eq!(read_limited(stream(), 10).await.unwrap(), b"helloworld");
        assert!(matches!(
            read_limited(stream(), 9).await,
            Err(GuardError::ResponseTooLarge { limit: 9 })
        ));
    }

    #[test]
    fn test_sync_reader_boundaries() {
        let guard = ResponseGuard::new(LIMIT);
        assert_eq!(guard.read_sync(&vec![0u8; LIMIT][..]).unwrap().len(), LIMIT);
        assert!(guard.read_sync(&vec![0u8; LIMIT + 1][..]).is_err());
        assert!(guard.read_sync(std::io::empty()).unwrap().is_empty());
    }

    #[test]
    fn test_declared_length() {
        let guard = ResponseGuard::new(LIMIT);
        assert!(guard.check_declared_length(None).is_ok());
        assert!(guard.check_declared_length(Some(LIMIT as u64)).is_ok());
        assert!(guard.check_declared_length(Some(LIMIT as u64 + 1)).is_err());
    }

    #[test]
    fn test_limiter_chunks() {
        let mut limiter = ResponseGuard::new(10).limiter();
        limiter.push(b"hello").unwrap();
        limiter.push(b"world").unwrap();
        assert_eq!(limiter.len(), 10);
        assert!(limiter.push(b"!").is_err());
        assert_eq!(limiter.finish(), b"helloworld");
    }

    #[test]
    fn test_default_guard() {
        assert_eq!(
            ResponseGuard::default().max_response_size(),
            DEFAULT_MAX_RESPONSE_SIZE
        );
    }
}
