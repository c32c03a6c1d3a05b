//! Concurrent batch fetching
//!
//! [`ConcurrentFetchOrchestrator`] fans a batch of ids out to a bounded pool of
//! worker tasks. Workers claim `(index, id)` pairs from a shared atomic cursor
//! and report each outcome tagged with its index; the orchestrator writes it
//! into the matching slot of a pre-sized result vector. Results therefore come
//! back in input order no matter which item finishes first, and one item's
//! failure never stops its siblings.

use crate::classify::Classify;
use crate::priority::RequestPriority;
use crate::retry::{AdaptiveRetryExecutor, ExecuteError};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker count used when none is configured
pub const DEFAULT_WORKERS: usize = 8;

/// Why a batch slot holds no value
#[derive(Debug)]
pub enum BatchError<E> {
    /// The operation for this item failed
    Failed(E),
    /// The batch was cancelled before this item finished
    Cancelled,
    /// The worker running this item panicked
    WorkerFailed,
}

impl<E> BatchError<E> {
    /// The operation error, if the item ran and failed
    #[must_use]
    pub fn as_failed(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Cancelled | Self::WorkerFailed => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => fmt::Display::fmt(e, f),
            Self::Cancelled => write!(f, "batch cancelled"),
            Self::WorkerFailed => write!(f, "batch worker failed"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BatchError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Cancelled | Self::WorkerFailed => None,
        }
    }
}

/// Outcome of one batch slot
pub type BatchOutcome<T, E> = Result<T, BatchError<E>>;

/// Ordered batch outcomes; slot `i` belongs to input `i`
#[derive(Debug)]
pub struct BatchResults<T, E> {
    outcomes: Vec<BatchOutcome<T, E>>,
}

impl<T, E> BatchResults<T, E> {
    fn new(outcomes: Vec<BatchOutcome<T, E>>) -> Self {
        Self { outcomes }
    }

    /// Number of slots (equals the number of inputs)
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch was empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome for input `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&BatchOutcome<T, E>> {
        self.outcomes.get(index)
    }

    /// Iterate outcomes in input order
    pub fn iter(&self) -> std::slice::Iter<'_, BatchOutcome<T, E>> {
        self.outcomes.iter()
    }

    /// Successful slots with their input index
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().ok().map(|v| (i, v)))
    }

    /// Failed slots with their input index
    pub fn failures(&self) -> impl Iterator<Item = (usize, &BatchError<E>)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    /// Count of successful slots
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|r| r.is_ok()).count()
    }

    /// Count of failed slots
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }

    /// Split into parallel value and error vectors of equal length
    #[must_use]
    pub fn into_parts(self) -> (Vec<Option<T>>, Vec<Option<BatchError<E>>>) {
        self.outcomes
            .into_iter()
            .map(|r| match r {
                Ok(v) => (Some(v), None),
                Err(e) => (None, Some(e)),
            })
            .unzip()
    }

    /// The raw outcome vector
    #[must_use]
    pub fn into_inner(self) -> Vec<BatchOutcome<T, E>> {
        self.outcomes
    }
}

impl<T, E> IntoIterator for BatchResults<T, E> {
    type Item = BatchOutcome<T, E>;
    type IntoIter = std::vec::IntoIter<BatchOutcome<T, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// Runs batches of remote operations on a bounded worker pool
#[derive(Debug, Clone)]
pub struct ConcurrentFetchOrchestrator {
    worker_count: usize,
}

impl Default for ConcurrentFetchOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl ConcurrentFetchOrchestrator {
    /// Create an orchestrator; `0` workers selects [`DEFAULT_WORKERS`]
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self { worker_count }
    }

    /// Configured worker count
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers actually spawned for a batch of `items`
    #[must_use]
    pub fn effective_workers(&self, items: usize) -> usize {
        let configured = if self.worker_count == 0 {
            DEFAULT_WORKERS
        } else {
            self.worker_count
        };
        configured.min(items)
    }

    /// Run `op` for every id and wait for all of them
    pub async fn fetch_all<I, T, E, F, Fut>(&self, ids: Vec<I>, op: F) -> BatchResults<T, E>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.fetch_all_with_cancel(ids, &CancellationToken::new(), op)
            .await
    }

    /// Run `op` for every id; once `cancel` fires, in-flight items are
    /// abandoned and unclaimed items resolve to [`BatchError::Cancelled`]
    pub async fn fetch_all_with_cancel<I, T, E, F, Fut>(
        &self,
        ids: Vec<I>,
        cancel: &CancellationToken,
        op: F,
    ) -> BatchResults<T, E>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let token = cancel.clone();

        self.run_batch(ids, cancel, move |id: I| {
            let attempt = op(id);
            let cancel = token.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(BatchError::Cancelled),
                    result = attempt => result.map_err(BatchError::Failed),
                }
            }
        })
        .await
    }

    /// Run every id through `executor`, so each item gets retries and the
    /// executor's circuit breaker.
    ///
    /// The executor observes `cancel` itself, so an abandoned call still gives
    /// back its breaker probe and is counted as cancelled.
    pub async fn fetch_all_with_executor<I, T, E, F, Fut>(
        &self,
        ids: Vec<I>,
        executor: Arc<AdaptiveRetryExecutor>,
        priority: RequestPriority,
        cancel: &CancellationToken,
        op: F,
    ) -> BatchResults<T, ExecuteError<E>>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Classify + fmt::Debug + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let op = Arc::new(op);
        let token = cancel.clone();

        self.run_batch(ids, cancel, move |id: I| {
            let executor = executor.clone();
            let op = op.clone();
            let token = token.clone();
            async move {
                match executor
                    .execute_with_cancel(priority, &token, || op(id.clone()))
                    .await
                {
                    Ok(value) => Ok(value),
                    Err(ExecuteError::Cancelled) => Err(BatchError::Cancelled),
                    Err(e) => Err(BatchError::Failed(e)),
                }
            }
        })
        .await
    }

    /// Worker pool shared by every batch flavour. Workers stop claiming once
    /// `cancel` fires; `op` decides how an in-flight item reacts to it.
    async fn run_batch<I, T, E, F, Fut>(
        &self,
        ids: Vec<I>,
        cancel: &CancellationToken,
        op: F,
    ) -> BatchResults<T, E>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchOutcome<T, E>> + Send + 'static,
    {
        let total = ids.len();
        if total == 0 {
            return BatchResults::new(Vec::new());
        }

        let workers = self.effective_workers(total);
        let start = Instant::now();
        info!(items = total, workers = workers, "Starting batch fetch");

        let ids = Arc::new(ids);
        let op = Arc::new(op);
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, BatchOutcome<T, E>)>();

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let ids = ids.clone();
                let op = op.clone();
                let cursor = cursor.clone();
                let cancel = cancel.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let mut completed = 0usize;
                    while !cancel.is_cancelled() {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(id) = ids.get(index) else {
                            break;
                        };

                        let outcome = op(id.clone()).await;
                        completed += 1;

                        if tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                    debug!(worker = worker, completed = completed, "Fetch worker finished");
                })
            })
            .collect();
        drop(tx);

        let mut slots: Vec<Option<BatchOutcome<T, E>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        while let Some((index, outcome)) = rx.recv().await {
            slots[index] = Some(outcome);
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Fetch worker failed");
            }
        }

        let cancelled = cancel.is_cancelled();
        let outcomes: Vec<_> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(if cancelled {
                        BatchError::Cancelled
                    } else {
                        BatchError::WorkerFailed
                    })
                })
            })
            .collect();

        let results = BatchResults::new(outcomes);
        info!(
            items = total,
            succeeded = results.success_count(),
            failed = results.failure_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch fetch finished"
        );
        results
    }
}
