//! Pinset Bucket
//!
//! Owns the directory object that lists everything an asset pins, and keeps
//! the pinset document pointing at its current root. Every mutation produces
//! a new directory object and a new root; the document is updated before the
//! in-memory state so a failed write leaves the bucket unchanged.
//!
//! Two link sets are tracked: `queued` always mirrors the current root, while
//! `pinned` lags behind and only moves when the pinning service confirms a
//! root.

use crate::backoff::{poll_until, Backoff};
use crate::config::PinsetConfig;
use crate::error::{PinsetError, Result};
use crate::store::{
    pinset_binding, DocumentBinding, DocumentStore, ObjectStore, PinningService, PinsetRecord,
};
use crate::types::{ContentId, DocumentId, Link, LinkSet};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Invoked when the pin attempt started during provisioning fails
pub type QueueFailureHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct BucketState {
    record_id: Option<DocumentId>,
    root: Option<ContentId>,
    root_block_size: u64,
    queued: Option<LinkSet>,
    pinned: Option<LinkSet>,
}

/// Point-in-time view of the bucket
#[derive(Debug, Clone, Default)]
pub struct BucketSnapshot {
    pub root: Option<ContentId>,
    pub queued: Option<LinkSet>,
    pub pinned: Option<LinkSet>,
}

/// Root and links captured when a pin is submitted
#[derive(Debug, Clone)]
pub struct PinTicket {
    pub root: ContentId,
    pub links: LinkSet,
}

pub struct Bucket {
    record: DocumentBinding<PinsetRecord>,
    objects: Arc<dyn ObjectStore>,
    pinning: Arc<dyn PinningService>,
    state: RwLock<BucketState>,
    backoff: Backoff,
    deadline: Option<Duration>,
    link_resolve_timeout: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Bucket {
    pub fn new(
        config: &PinsetConfig,
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        pinning: Arc<dyn PinningService>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            record: pinset_binding(documents, &config.asset_id, &config.controller_id),
            objects,
            pinning,
            state: RwLock::new(BucketState::default()),
            backoff: config.pinning.backoff(),
            deadline: config.pinning.deadline(),
            link_resolve_timeout: config.pinning.link_resolve_timeout(),
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// Load the current root from the pinset document, or create an empty
    /// directory if none has been published yet.
    pub async fn fetch_or_provision_bucket(
        self: &Arc<Self>,
        on_queue_failure: Option<QueueFailureHook>,
    ) -> Result<()> {
        let (record_id, record) = self.record.open().await?;
        self.state.write().record_id = Some(record_id.clone());

        match record.root_cid() {
            Some(root) => {
                let links = self.resolve_links(&root).await?;
                let block_size = self.objects.stat_object(&root).await?.block_size;
                {
                    let mut state = self.state.write();
                    state.root = Some(root.clone());
                    state.root_block_size = block_size;
                    state.queued = Some(LinkSet::from_links(links));
                }
                info!(root = %root, "Loaded bucket");
                self.fetch_latest_pinset(on_queue_failure).await;
            }
            None => {
                let root = self.objects.new_directory().await?;
                self.commit(&record_id, root.clone(), LinkSet::new()).await?;
                info!(root = %root, "Provisioned empty bucket");
            }
        }
        Ok(())
    }

    /// Links of `root`, importing the graph from the pinning service when the
    /// local store cannot produce them in time.
    async fn resolve_links(&self, root: &ContentId) -> Result<Vec<Link>> {
        match tokio::time::timeout(self.link_resolve_timeout, self.objects.get_links(root)).await {
            Ok(Ok(links)) => return Ok(links),
            Ok(Err(e)) => warn!(root = %root, error = %e, "Link resolution failed, importing graph"),
            Err(_) => warn!(
                root = %root,
                timeout_ms = self.link_resolve_timeout.as_millis() as u64,
                "Link resolution timed out, importing graph"
            ),
        }
        let archive = self.pinning.fetch_archive(root).await?;
        self.objects.import_graph(&archive).await?;
        Ok(self.objects.get_links(root).await?)
    }

    /// Check the remote pin status of the current root once. Confirms the
    /// queued links when pinned, otherwise starts a pin in the background.
    /// Status check errors leave the pinned state untouched.
    pub async fn fetch_latest_pinset(self: &Arc<Self>, on_queue_failure: Option<QueueFailureHook>) {
        let Some(root) = self.root() else {
            return;
        };
        let status = match self.pinning.status_of(&root).await {
            Ok(status) => status,
            Err(e) => {
                debug!(root = %root, error = %e, "Pin status check failed");
                return;
            }
        };

        if status.is_pinned() {
            let mut state = self.state.write();
            if state.root.as_ref() == Some(&root) {
                state.pinned = state.queued.clone();
            }
            debug!(root = %root, "Bucket root already pinned");
            return;
        }

        let bucket = Arc::clone(self);
        self.spawn(async move {
            if let Err(e) = bucket.trigger_pin().await {
                warn!(error = %e, "Pinning provisioned bucket failed");
                if let Some(hook) = on_queue_failure {
                    hook();
                }
            }
        });
    }

    /// Insert `name -> cid`. A name that is already present is left as it
    /// is, even when it points at a different content id.
    ///
    /// Returns whether a new link was added.
    pub async fn add_cid(&self, name: &str, cid: &ContentId) -> Result<bool> {
        let (record_id, mut links) = self.mutable_state()?;
        if links.contains_name(name) {
            debug!(name, cid = %cid, "Name already in bucket, ignoring");
            return Ok(false);
        }

        let stat = self.objects.stat_object(cid).await?;
        links.insert(Link::new(name, cid.clone(), stat.cumulative_size));
        let root = self.objects.put_directory(links.as_slice()).await?;
        self.commit(&record_id, root, links).await?;
        Ok(true)
    }

    /// Remove the link called `name` and submit the new root for pinning.
    ///
    /// Submission is awaited; confirmation is polled in the background.
    pub async fn remove_cid(self: &Arc<Self>, name: &str) -> Result<()> {
        let (record_id, mut links) = self.mutable_state()?;
        let current = self.root().ok_or(PinsetError::NotProvisioned)?;

        let root = self.objects.patch_remove_link(&current, name).await?;
        links.remove(name);
        self.commit(&record_id, root, links).await?;

        match self.submit_pin().await {
            Ok(ticket) => {
                let bucket = Arc::clone(self);
                self.spawn(async move {
                    if let Err(e) = bucket.confirm_pin(ticket).await {
                        warn!(error = %e, "Pin confirmation after removal failed");
                    }
                });
            }
            Err(e) => warn!(name, error = %e, "Pin submission after removal failed"),
        }
        Ok(())
    }

    /// Replace the bucket with an empty directory and provision again.
    /// When a coordinator owns the bucket, go through
    /// [`PinCoordinator::reset`](crate::coordinator::PinCoordinator::reset).
    pub async fn reset(self: &Arc<Self>) -> Result<()> {
        let known = self.state.read().record_id.clone();
        let record_id = match known {
            Some(id) => id,
            None => self.record.open().await?.0,
        };
        let root = self.objects.new_directory().await?;
        self.commit(&record_id, root, LinkSet::new()).await?;
        info!("Reset bucket");
        self.fetch_or_provision_bucket(None).await
    }

    /// Export the current graph, submit it and wait for the service to
    /// confirm the pin.
    pub async fn trigger_pin(&self) -> Result<()> {
        let ticket = self.submit_pin().await?;
        self.confirm_pin(ticket).await
    }

    /// Export the graph of the current root and hand it to the pinning service.
    pub async fn submit_pin(&self) -> Result<PinTicket> {
        let ticket = {
            let state = self.state.read();
            let root = state.root.clone().ok_or(PinsetError::NotProvisioned)?;
            PinTicket {
                root,
                links: state.queued.clone().unwrap_or_default(),
            }
        };
        let archive = self.objects.export_graph(&ticket.root).await?;
        let bytes = archive.len();
        self.pinning.submit_archive(archive).await?;
        debug!(root = %ticket.root, bytes, "Submitted bucket for pinning");
        Ok(ticket)
    }

    /// Poll until `ticket.root` is pinned, then record its links as pinned.
    /// A failed status check ends the poll with that error.
    pub async fn confirm_pin(&self, ticket: PinTicket) -> Result<()> {
        let pinning = Arc::clone(&self.pinning);
        let root = ticket.root.clone();
        let poll = poll_until(&self.backoff, &self.cancel, || {
            let pinning = Arc::clone(&pinning);
            let root = root.clone();
            async move { pinning.status_of(&root).await.map(|s| s.is_pinned()) }
        });

        let attempts = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, poll).await.map_err(|_| {
                PinsetError::Timeout(format!("pin of {} not confirmed", ticket.root))
            })??,
            None => poll.await?,
        };

        info!(root = %ticket.root, links = ticket.links.len(), attempts, "Pin confirmed");
        self.state.write().pinned = Some(ticket.links);
        Ok(())
    }

    pub fn is_pinned(&self, cid: &ContentId) -> bool {
        self.state
            .read()
            .pinned
            .as_ref()
            .map(|links| links.contains_cid(cid))
            .unwrap_or(false)
    }

    pub fn is_queued(&self, cid: &ContentId) -> bool {
        self.state
            .read()
            .queued
            .as_ref()
            .map(|links| links.contains_cid(cid))
            .unwrap_or(false)
    }

    /// Dereferenceable URI of the current root
    pub fn bucket_link(&self) -> Option<String> {
        self.root().map(|root| root.uri())
    }

    pub fn root(&self) -> Option<ContentId> {
        self.state.read().root.clone()
    }

    pub fn queued_links(&self) -> Option<LinkSet> {
        self.state.read().queued.clone()
    }

    pub fn pinned_links(&self) -> Option<LinkSet> {
        self.state.read().pinned.clone()
    }

    /// Content ids that are queued but not confirmed pinned
    pub fn unpinned_cids(&self) -> Vec<ContentId> {
        let state = self.state.read();
        let Some(queued) = &state.queued else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        queued
            .cids()
            .filter(|cid| {
                !state
                    .pinned
                    .as_ref()
                    .map(|pinned| pinned.contains_cid(cid))
                    .unwrap_or(false)
            })
            .filter(|cid| seen.insert(*cid))
            .cloned()
            .collect()
    }

    /// Sum of unique link sizes plus the directory block itself
    pub fn storage_used(&self) -> Option<u64> {
        let state = self.state.read();
        state.root.as_ref()?;
        let links = state.queued.as_ref().map(LinkSet::unique_size).unwrap_or(0);
        Some(links + state.root_block_size)
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.read();
        BucketSnapshot {
            root: state.root.clone(),
            queued: state.queued.clone(),
            pinned: state.pinned.clone(),
        }
    }

    /// Number of background pin tasks still running
    pub fn pins_in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel background polling and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    fn mutable_state(&self) -> Result<(DocumentId, LinkSet)> {
        let state = self.state.read();
        match (&state.record_id, &state.root) {
            (Some(record_id), Some(_)) => Ok((
                record_id.clone(),
                state.queued.clone().unwrap_or_default(),
            )),
            _ => Err(PinsetError::NotProvisioned),
        }
    }

    /// Publish `root` and then adopt it as the current state.
    async fn commit(&self, record_id: &DocumentId, root: ContentId, links: LinkSet) -> Result<()> {
        let block_size = self.objects.stat_object(&root).await?.block_size;
        self.record
            .write(record_id, &PinsetRecord::with_root(&root))
            .await?;

        let mut state = self.state.write();
        info!(root = %root, links = links.len(), "Bucket root updated");
        state.root = Some(root);
        state.root_block_size = block_size;
        state.queued = Some(links);
        Ok(())
    }
}
