//! Mutation Queue
//!
//! FIFO queue with a single worker. Mutations run one at a time in
//! submission order, and consecutive dequeues are spaced by at least the
//! configured interval to rate-limit writes to the document store.

use crate::config::QueueConfig;
use crate::error::{PinsetError, Result};
use crate::types::ContentId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Bucket mutation requested through the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Pin { name: String, cid: ContentId },
    Unpin { name: String },
    Reset,
}

/// Applies dequeued mutations
#[async_trait]
pub trait MutationHandler: Send + Sync {
    async fn apply(&self, mutation: &Mutation) -> Result<()>;
}

struct MutationRequest {
    seq: u64,
    mutation: Mutation,
    responder: oneshot::Sender<Result<()>>,
    enqueued_at: Instant,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct MutationQueue {
    queue: Arc<Mutex<VecDeque<MutationRequest>>>,
    notify: Arc<Notify>,
    worker: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stats: Arc<RwLock<QueueStats>>,
    next_seq: AtomicU64,
    min_interval: Duration,
    cancel: CancellationToken,
}

impl MutationQueue {
    pub fn new(config: &QueueConfig, cancel: CancellationToken) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            worker: parking_lot::Mutex::new(None),
            stats: Arc::new(RwLock::new(QueueStats::default())),
            next_seq: AtomicU64::new(0),
            min_interval: config.min_interval(),
            cancel,
        }
    }

    /// Start the worker. Must be called from within a tokio runtime.
    pub fn start(&self, handler: Arc<dyn MutationHandler>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let queue = Arc::clone(&self.queue);
        let notify = Arc::clone(&self.notify);
        let stats = Arc::clone(&self.stats);
        let min_interval = self.min_interval;
        let cancel = self.cancel.clone();
        *worker = Some(tokio::spawn(async move {
            Self::worker_loop(queue, notify, stats, handler, min_interval, cancel).await;
        }));
        info!(min_interval_ms = min_interval.as_millis() as u64, "Started mutation queue");
    }

    /// Enqueue a mutation and wait for it to be applied.
    pub async fn submit(&self, mutation: Mutation) -> Result<()> {
        let (responder, outcome) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            // The worker drains under this lock once cancelled.
            if self.cancel.is_cancelled() {
                return Err(PinsetError::QueueClosed);
            }
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            debug!(seq, mutation = ?mutation, queue_size = queue.len() + 1, "Enqueued mutation");
            queue.push_back(MutationRequest {
                seq,
                mutation,
                responder,
                enqueued_at: Instant::now(),
            });
            self.stats.write().pending += 1;
        }
        self.notify.notify_one();

        outcome.await.map_err(|_| PinsetError::QueueClosed)?
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.read().clone()
    }

    /// True when nothing is pending or being applied
    pub fn is_idle(&self) -> bool {
        let stats = self.stats.read();
        stats.pending == 0 && stats.processing == 0
    }

    /// Stop the worker. Requests still queued are answered with `QueueClosed`.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }

    async fn worker_loop(
        queue: Arc<Mutex<VecDeque<MutationRequest>>>,
        notify: Arc<Notify>,
        stats: Arc<RwLock<QueueStats>>,
        handler: Arc<dyn MutationHandler>,
        min_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut last_dequeue: Option<Instant> = None;

        while !cancel.is_cancelled() {
            let request = queue.lock().await.pop_front();
            let Some(request) = request else {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = cancel.cancelled() => {}
                }
                continue;
            };

            if let Some(last) = last_dequeue {
                let elapsed = last.elapsed();
                if elapsed < min_interval {
                    sleep(min_interval - elapsed).await;
                }
            }
            last_dequeue = Some(Instant::now());

            {
                let mut stats = stats.write();
                stats.pending = stats.pending.saturating_sub(1);
                stats.processing += 1;
            }

            debug!(
                seq = request.seq,
                waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
                "Applying mutation"
            );
            let result = handler.apply(&request.mutation).await;

            {
                let mut stats = stats.write();
                stats.processing = stats.processing.saturating_sub(1);
                match &result {
                    Ok(()) => stats.completed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!(seq = request.seq, mutation = ?request.mutation, error = %e, "Mutation failed");
                    }
                }
            }
            let _ = request.responder.send(result);
        }

        let remaining: Vec<MutationRequest> = queue.lock().await.drain(..).collect();
        if !remaining.is_empty() {
            stats.write().pending = 0;
            for request in remaining {
                let _ = request.responder.send(Err(PinsetError::QueueClosed));
            }
        }
        debug!("Mutation queue worker stopped");
    }
}
