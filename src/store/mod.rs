//! Collaborator Contracts
//!
//! The bucket talks to three external services: a versioned document store
//! that publishes the current root, a content-addressed object store that
//! holds the directory object, and a remote pinning service. Each is a
//! trait here, with local implementations over a [`KvBackend`] and an HTTP
//! client for the pinning service.

pub mod document;
pub mod kv;
pub mod object;
pub mod pinning;

pub use document::{pinset_binding, DocumentBinding, LocalDocumentStore, PinsetRecord};
pub use kv::{KvBackend, MemoryKv, SledKv};
pub use object::{Block, GraphArchive, LocalObjectStore};
pub use pinning::{HttpPinningService, LocalPinningService, PinStatus};

use crate::error::StoreResult;
use crate::types::{ContentId, DocumentId, Link, ObjectStat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A loaded version of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHandle {
    pub id: DocumentId,
    pub content: serde_json::Value,
    pub schema: Option<String>,
    pub controller: String,
    pub family: String,
    /// Incremented on every update; 0 at creation
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub pinned: bool,
}

/// Versioned document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document. When `deterministic` is set the id is derived from
    /// `(controller, family)` and an existing document is returned unchanged.
    async fn create(
        &self,
        content: serde_json::Value,
        schema: Option<&str>,
        controller: &str,
        family: &str,
        deterministic: bool,
    ) -> StoreResult<DocumentHandle>;

    async fn load(&self, id: &DocumentId) -> StoreResult<DocumentHandle>;

    async fn update(
        &self,
        id: &DocumentId,
        content: serde_json::Value,
    ) -> StoreResult<DocumentHandle>;

    async fn pin(&self, id: &DocumentId) -> StoreResult<()>;

    async fn unpin(&self, id: &DocumentId) -> StoreResult<()>;
}

/// Content-addressed object store holding raw blocks and directory objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_block(&self, data: &[u8]) -> StoreResult<ContentId>;

    async fn new_directory(&self) -> StoreResult<ContentId>;

    async fn get_links(&self, id: &ContentId) -> StoreResult<Vec<Link>>;

    async fn put_directory(&self, links: &[Link]) -> StoreResult<ContentId>;

    async fn patch_remove_link(&self, id: &ContentId, name: &str) -> StoreResult<ContentId>;

    async fn stat_object(&self, id: &ContentId) -> StoreResult<ObjectStat>;

    /// Serialize the full graph rooted at `id`
    async fn export_graph(&self, id: &ContentId) -> StoreResult<Vec<u8>>;

    /// Import an exported graph, returning its roots
    async fn import_graph(&self, data: &[u8]) -> StoreResult<Vec<ContentId>>;
}

/// Remote pinning service
#[async_trait]
pub trait PinningService: Send + Sync {
    async fn submit_archive(&self, data: Vec<u8>) -> StoreResult<ContentId>;

    async fn status_of(&self, root: &ContentId) -> StoreResult<PinStatus>;

    /// Fetch the full export of a graph the service holds
    async fn fetch_archive(&self, root: &ContentId) -> StoreResult<Vec<u8>>;
}
