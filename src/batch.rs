//! Outbound network request batching.
//!
//! Queues requests in memory (persisted across restarts) and flushes them
//! in priority order on a fixed interval, subject to connectivity. A
//! request that fails mid-flush is not re-enqueued here; retry is the
//! caller's responsibility.

use crate::doze::now_epoch_millis;
use crate::platform::PlatformExecutor;
use crate::store;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Highest allowed request priority.
pub const MAX_REQUEST_PRIORITY: u8 = 10;

/// An outbound request waiting for the next flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedRequest {
    /// Request identifier. Duplicate ids may coexist in the queue.
    pub id: String,
    /// Target endpoint path or URL.
    pub endpoint: String,
    /// HTTP method name.
    pub method: String,
    /// Request body.
    pub payload: serde_json::Value,
    /// Flush priority, 0–10 (higher flushes first).
    pub priority: u8,
    /// Epoch milliseconds when enqueued; breaks priority ties.
    pub enqueued_at: u64,
    /// Estimated payload size in bytes.
    pub estimated_size: usize,
}

impl BatchedRequest {
    /// Create a request with a fresh v4 id, default priority 5 and
    /// `enqueued_at` stamped now.
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let estimated_size = payload.to_string().len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            method: method.into(),
            payload,
            priority: 5,
            enqueued_at: now_epoch_millis(),
            estimated_size,
        }
    }

    /// Override the request id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the flush priority, clamped to 0–10.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_REQUEST_PRIORITY);
        self
    }
}

/// Transport seam: the host executes flushed requests.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Execute one request. Returns `true` on success. The batcher does
    /// not re-enqueue on `false`.
    async fn dispatch(&self, request: &BatchedRequest) -> bool;
}

/// Outcome of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Offline; queue left intact for the next tick.
    Offline,
    /// Queue drained; counts of attempted and successful dispatches.
    Drained {
        /// Requests attempted.
        attempted: usize,
        /// Requests the dispatcher reported as successful.
        succeeded: usize,
    },
}

/// Priority-ordered outbound request queue with periodic flushing.
///
/// The queue is mutated both by callers (`enqueue`, from anywhere) and by
/// the flush loop, so it lives behind a mutex supporting concurrent
/// append and atomic drain.
pub struct NetworkBatcher {
    queue: Mutex<Vec<BatchedRequest>>,
    state_path: Option<PathBuf>,
    platform: Arc<dyn PlatformExecutor>,
    dispatcher: Arc<dyn RequestDispatcher>,
    flush_interval_secs: u64,
}

impl NetworkBatcher {
    /// Create a batcher persisting to the default queue path.
    pub fn new(
        platform: Arc<dyn PlatformExecutor>,
        dispatcher: Arc<dyn RequestDispatcher>,
        flush_interval_secs: u64,
    ) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            state_path: store::default_queue_path(),
            platform,
            dispatcher,
            flush_interval_secs,
        }
    }

    /// Override the queue persistence path (`None` disables persistence).
    #[must_use]
    pub fn with_state_path(mut self, path: Option<PathBuf>) -> Self {
        self.state_path = path;
        self
    }

    /// Load the persisted queue from disk, replacing the in-memory queue.
    pub fn load_queue(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        match store::read_json::<Vec<BatchedRequest>>(path) {
            Ok(Some(requests)) => {
                debug!("loaded {} batched requests from {}", requests.len(), path.display());
                *self.lock_queue() = requests;
            }
            Ok(None) => {}
            Err(e) => warn!("cannot load batch queue: {e}"),
        }
    }

    /// Append a request and persist the queue.
    ///
    /// No dedup by id is performed; a duplicate id is logged so hosts can
    /// spot accidental double-enqueues.
    pub fn enqueue(&self, request: BatchedRequest) {
        {
            let mut queue = self.lock_queue();
            if queue.iter().any(|existing| existing.id == request.id) {
                debug!("batch queue already holds request id {}", request.id);
            }
            queue.push(request);
        }
        self.persist_queue();
    }

    /// Number of requests waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Snapshot of the queued requests in enqueue order.
    pub fn queued(&self) -> Vec<BatchedRequest> {
        self.lock_queue().clone()
    }

    /// Flush the queue once.
    ///
    /// Offline is a no-op leaving the queue intact. Online, the queue is
    /// drained atomically, sorted by priority descending (stable, so
    /// enqueue order breaks ties) and dispatched in that order. Entries
    /// are gone after the flush whether or not they succeeded.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.platform.connectivity().connected {
            debug!("batch flush skipped: offline");
            return FlushOutcome::Offline;
        }

        let mut batch = std::mem::take(&mut *self.lock_queue());
        if batch.is_empty() {
            self.persist_queue();
            return FlushOutcome::Drained {
                attempted: 0,
                succeeded: 0,
            };
        }

        batch.sort_by(|a, b| b.priority.cmp(&a.priority));

        let attempted = batch.len();
        let mut succeeded = 0;
        for request in &batch {
            if self.dispatcher.dispatch(request).await {
                succeeded += 1;
            } else {
                warn!(
                    "batched request {} to {} failed; not re-enqueued",
                    request.id, request.endpoint
                );
            }
        }

        self.persist_queue();
        info!("batch flush: {succeeded}/{attempted} requests dispatched");
        FlushOutcome::Drained {
            attempted,
            succeeded,
        }
    }

    /// Start the fixed-interval flush loop.
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval_secs = self.flush_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            // The first tick of a tokio interval fires immediately; skip
            // it so startup does not trigger an instant flush.
            interval.tick().await;
            loop {
                interval.tick().await;
                let _ = self.flush().await;
            }
        })
    }

    fn persist_queue(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let snapshot = self.lock_queue().clone();
        if let Err(e) = store::write_json_atomic(path, &snapshot) {
            error!("cannot persist batch queue: {e}");
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<BatchedRequest>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}
