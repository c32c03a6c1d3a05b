//! vulnkb Fetch - HTTP feed client
//!
//! Fetches JSON vulnerability records from a remote feed. Every request goes
//! through an [`AdaptiveRetryExecutor`], so rate limiting and transient
//! outages are retried with backoff behind a circuit breaker, and response
//! bodies are capped by a [`ResponseGuard`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;

pub use client::{FeedClient, FeedConfig};
pub use error::FetchError;
