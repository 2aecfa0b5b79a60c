//! Pin Coordinator
//!
//! Linearizes pin and unpin requests from any number of callers through the
//! mutation queue and tracks remote pin outcomes per content id. A request
//! resolves once the bucket has recorded the local mutation; the remote pin
//! runs afterwards and is observable through [`PinCoordinator::succeeded_pins`]
//! and [`PinCoordinator::failed_pins`].

pub mod queue;

pub use queue::{Mutation, MutationHandler, MutationQueue, QueueStats};

use crate::bucket::{Bucket, QueueFailureHook};
use crate::config::PinsetConfig;
use crate::error::{PinsetError, Result};
use crate::types::ContentId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Remote pin outcomes. A content id is in at most one of the two sets.
#[derive(Debug, Default, Clone)]
pub struct PinSets {
    succeeded: HashSet<ContentId>,
    failed: HashSet<ContentId>,
}

impl PinSets {
    pub fn mark_succeeded(&mut self, cid: ContentId) {
        self.failed.remove(&cid);
        self.succeeded.insert(cid);
    }

    pub fn mark_failed(&mut self, cid: ContentId) {
        self.succeeded.remove(&cid);
        self.failed.insert(cid);
    }

    pub fn clear_failed(&mut self, cid: &ContentId) {
        self.failed.remove(cid);
    }

    pub fn is_succeeded(&self, cid: &ContentId) -> bool {
        self.succeeded.contains(cid)
    }

    pub fn is_failed(&self, cid: &ContentId) -> bool {
        self.failed.contains(cid)
    }
}

/// Mark every queued-but-unpinned content id as failed
fn mark_unpinned_failed(bucket: &Bucket, pins: &RwLock<PinSets>) {
    let unpinned = bucket.unpinned_cids();
    warn!(count = unpinned.len(), "Marking unpinned content as failed");
    let mut pins = pins.write();
    for cid in unpinned {
        pins.mark_failed(cid);
    }
}

/// Applies dequeued mutations to the bucket
struct BucketApplier {
    bucket: Arc<Bucket>,
    pins: Arc<RwLock<PinSets>>,
}

#[async_trait]
impl MutationHandler for BucketApplier {
    async fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Pin { name, cid } => {
                self.bucket.add_cid(name, cid).await?;
                let bucket = Arc::clone(&self.bucket);
                let pins = Arc::clone(&self.pins);
                let cid = cid.clone();
                self.bucket.spawn(async move {
                    match bucket.trigger_pin().await {
                        Ok(()) => pins.write().mark_succeeded(cid),
                        Err(e) => {
                            warn!(cid = %cid, error = %e, "Remote pin failed");
                            pins.write().mark_failed(cid);
                        }
                    }
                });
                Ok(())
            }
            Mutation::Unpin { name } => self.bucket.remove_cid(name).await,
            Mutation::Reset => self.bucket.reset().await,
        }
    }
}

pub struct PinCoordinator {
    bucket: Arc<Bucket>,
    pins: Arc<RwLock<PinSets>>,
    queue: MutationQueue,
    storage_limit: u64,
}

impl PinCoordinator {
    /// Create the coordinator and start its queue worker.
    /// Must be called from within a tokio runtime.
    pub fn new(bucket: Arc<Bucket>, config: &PinsetConfig) -> Self {
        let pins = Arc::new(RwLock::new(PinSets::default()));
        let queue = MutationQueue::new(&config.queue, bucket.cancel_token());
        queue.start(Arc::new(BucketApplier {
            bucket: Arc::clone(&bucket),
            pins: Arc::clone(&pins),
        }));
        Self {
            bucket,
            pins,
            queue,
            storage_limit: config.storage_limit_bytes,
        }
    }

    pub fn bucket(&self) -> &Arc<Bucket> {
        &self.bucket
    }

    /// Load or create the bucket. If the background pin started while
    /// loading fails, every unpinned content id is marked failed.
    pub async fn provision(&self) -> Result<()> {
        let bucket = Arc::clone(&self.bucket);
        let pins = Arc::clone(&self.pins);
        let hook: QueueFailureHook = Box::new(move || mark_unpinned_failed(&bucket, &pins));
        self.bucket.fetch_or_provision_bucket(Some(hook)).await
    }

    /// Queue `name -> cid`; resolves once the bucket records it locally.
    /// A remote pin of the resulting root is started either way, so a name
    /// that is already present still gets its content pinned.
    pub async fn pin_cid(&self, name: &str, cid: &ContentId) -> Result<()> {
        self.pins.write().clear_failed(cid);
        self.queue
            .submit(Mutation::Pin {
                name: name.to_string(),
                cid: cid.clone(),
            })
            .await
    }

    /// Queue removal of `name`; resolves once the new root is recorded and
    /// submitted for pinning.
    pub async fn unpin_cid(&self, name: &str) -> Result<()> {
        self.queue
            .submit(Mutation::Unpin {
                name: name.to_string(),
            })
            .await
    }

    /// Queue replacement of the bucket with an empty directory.
    pub async fn reset(&self) -> Result<()> {
        self.queue.submit(Mutation::Reset).await
    }

    /// Pin the current root again, optimistically clearing failures first.
    pub async fn retry_pin(&self) -> Result<()> {
        let pending = self.bucket.unpinned_cids();
        {
            let mut pins = self.pins.write();
            for cid in &pending {
                pins.clear_failed(cid);
            }
        }
        info!(count = pending.len(), "Retrying pin");

        match self.bucket.trigger_pin().await {
            Ok(()) => {
                let mut pins = self.pins.write();
                for cid in pending {
                    pins.mark_succeeded(cid);
                }
                Ok(())
            }
            Err(e) => {
                self.queue_did_fail();
                Err(e)
            }
        }
    }

    /// Mark every queued-but-unpinned content id as failed.
    pub fn queue_did_fail(&self) {
        mark_unpinned_failed(&self.bucket, &self.pins);
    }

    pub fn is_pinned(&self, cid: &ContentId) -> bool {
        self.bucket.is_pinned(cid)
    }

    pub fn is_queued(&self, cid: &ContentId) -> bool {
        self.bucket.is_queued(cid)
    }

    pub fn is_failed(&self, cid: &ContentId) -> bool {
        self.pins.read().is_failed(cid)
    }

    pub fn succeeded_pins(&self) -> HashSet<ContentId> {
        self.pins.read().succeeded.clone()
    }

    pub fn failed_pins(&self) -> HashSet<ContentId> {
        self.pins.read().failed.clone()
    }

    pub fn storage_used(&self) -> Option<u64> {
        self.bucket.storage_used()
    }

    pub fn storage_limit(&self) -> u64 {
        self.storage_limit
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Wait until the queue is drained and no pin task is running.
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.queue.is_idle() && self.bucket.pins_in_flight() == 0 {
                return Ok(());
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(PinsetError::Timeout(
                        "waiting for pin coordinator to become idle".to_string(),
                    ));
                }
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop the queue and cancel all background pin polling.
    pub async fn shutdown(&self) {
        self.queue.stop().await;
        self.bucket.shutdown().await;
        debug!("Pin coordinator stopped");
    }
}
