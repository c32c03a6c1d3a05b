//! Feed client

use crate::error::FetchError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use vulnkb_core::{
    AdaptiveRetryExecutor, BatchResults, CancellationToken, CircuitBreaker,
    ConcurrentFetchOrchestrator, ErrorKind, ExecuteError, HttpStatusClassifier, RequestPriority,
    ResilienceSettings, ResponseGuard, SignalClassifier,
};

/// Placeholder replaced by the record id in [`FeedConfig::url_template`]
pub const ID_PLACEHOLDER: &str = "{id}";

/// Where and how to reach one feed
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Feed name, also used as the circuit breaker name
    pub name: String,
    /// Record URL containing `{id}`, e.g. `https://api.osv.dev/v1/vulns/{id}`
    pub url_template: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
}

impl FeedConfig {
    /// Create a feed config with a 30s request timeout
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL for record `id`
    #[must_use]
    pub fn url_for(&self, id: &str) -> String {
        self.url_template.replace(ID_PLACEHOLDER, id)
    }
}

/// Resilient JSON client for one feed
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    config: FeedConfig,
    executor: Arc<AdaptiveRetryExecutor>,
    classifier: HttpStatusClassifier,
    guard: ResponseGuard,
    orchestrator: ConcurrentFetchOrchestrator,
}

impl FeedClient {
    /// Create a client around a shared executor
    pub fn new(
        http: reqwest::Client,
        config: FeedConfig,
        executor: Arc<AdaptiveRetryExecutor>,
    ) -> Self {
        Self {
            http,
            config,
            executor,
            classifier: HttpStatusClassifier::default(),
            guard: ResponseGuard::default(),
            orchestrator: ConcurrentFetchOrchestrator::default(),
        }
    }

    /// Create a client with executor, guard and worker pool built from settings
    pub fn from_settings(
        http: reqwest::Client,
        config: FeedConfig,
        settings: &ResilienceSettings,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.name.clone(),
            settings.circuit_breaker_config(),
        ));
        let executor = Arc::new(AdaptiveRetryExecutor::new(settings.retry_config(), breaker));

        Self::new(http, config, executor)
            .with_guard(settings.response_guard())
            .with_orchestrator(settings.orchestrator())
    }

    /// Replace the status classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: HttpStatusClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the response guard
    #[must_use]
    pub fn with_guard(mut self, guard: ResponseGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Replace the batch orchestrator
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: ConcurrentFetchOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Feed configuration
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// The executor shared by every request of this client
    #[must_use]
    pub fn executor(&self) -> &Arc<AdaptiveRetryExecutor> {
        &self.executor
    }

    /// Fetch one record
    pub async fn fetch(
        &self,
        id: &str,
        priority: RequestPriority,
    ) -> Result<Value, ExecuteError<FetchError>> {
        self.fetch_with_cancel(id, priority, &CancellationToken::new())
            .await
    }

    /// Fetch one record, giving up once `cancel` fires
    pub async fn fetch_with_cancel(
        &self,
        id: &str,
        priority: RequestPriority,
        cancel: &CancellationToken,
    ) -> Result<Value, ExecuteError<FetchError>> {
        let url = self.config.url_for(id);
        self.executor
            .execute_with_cancel(priority, cancel, || self.fetch_once(&url))
            .await
    }

    /// Fetch many records concurrently; slot `i` holds the outcome for `ids[i]`
    pub async fn fetch_many(
        &self,
        ids: Vec<String>,
        priority: RequestPriority,
    ) -> BatchResults<Value, ExecuteError<FetchError>> {
        self.fetch_many_with_cancel(ids, priority, &CancellationToken::new())
            .await
    }

    /// [`fetch_many`](Self::fetch_many) with cancellation
    pub async fn fetch_many_with_cancel(
        &self,
        ids: Vec<String>,
        priority: RequestPriority,
        cancel: &CancellationToken,
    ) -> BatchResults<Value, ExecuteError<FetchError>> {
        let client = self.clone();
        self.orchestrator
            .fetch_all_with_executor(
                ids,
                self.executor.clone(),
                priority,
                cancel,
                move |id: String| {
                    let client = client.clone();
                    async move { client.fetch_once(&client.config.url_for(&id)).await }
                },
            )
            .await
    }

    #[instrument(skip(self), fields(feed = %self.config.name))]
    async fn fetch_once(&self, url: &str) -> Result<Value, FetchError> {
        let mut response = self
            .http
            .get(url)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let kind = self.classifier.classify(&code);

            if kind == Some(ErrorKind::RATE_LIMITED) {
                let retry_after = retry_after(response.headers());
                warn!(status = code, retry_after = ?retry_after, "Feed rate limited request");
                return Err(FetchError::RateLimited { retry_after });
            }

            debug!(status = code, kind = ?kind, "Feed returned error status");
            return Err(FetchError::Status { status: code, kind });
        }

        self.guard.check_declared_length(response.content_length())?;

        let mut body = self.guard.limiter();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::from_reqwest)? {
            body.push(&chunk)?;
        }

        debug!(bytes = body.len(), "Feed response received");
        Ok(serde_json::from_slice(&body.finish())?)
    }
}

/// Retry-After in delay-seconds form; HTTP dates are ignored
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
