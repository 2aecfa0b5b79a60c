//! Versioned documents
//!
//! [`LocalDocumentStore`] keeps JSON documents in a key-value backend.
//! [`DocumentBinding`] binds a typed document to a schema and a deterministic
//! creation policy; each record kind is one free function over it.

use super::kv::KvBackend;
use super::{DocumentHandle, DocumentStore};
use crate::error::{StoreError, StoreResult};
use crate::types::{ContentId, DocumentId};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Schema reference of the pinset record
pub const PINSET_SCHEMA: &str = "pinset-record/v1";

/// Document store over any [`KvBackend`]
pub struct LocalDocumentStore<K: KvBackend> {
    documents: K,
    nonce: AtomicU64,
    /// Serializes read-modify-write cycles on documents
    write_lock: Mutex<()>,
}

impl<K: KvBackend> LocalDocumentStore<K> {
    pub fn new(documents: K) -> Self {
        Self {
            documents,
            nonce: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    fn key(id: &DocumentId) -> Vec<u8> {
        format!("doc/{}", id).into_bytes()
    }

    fn deterministic_id(controller: &str, family: &str) -> DocumentId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(controller.as_bytes());
        hasher.update(&[0]);
        hasher.update(family.as_bytes());
        DocumentId(format!("doc-{}", &hasher.finalize().to_hex()[..32]))
    }

    fn unique_id(&self, controller: &str, family: &str) -> DocumentId {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(controller.as_bytes());
        hasher.update(&[0]);
        hasher.update(family.as_bytes());
        hasher.update(&nonce.to_le_bytes());
        hasher.update(Utc::now().to_rfc3339().as_bytes());
        DocumentId(format!("doc-{}", &hasher.finalize().to_hex()[..32]))
    }

    fn read(&self, id: &DocumentId) -> StoreResult<Option<DocumentHandle>> {
        match self.documents.get(&Self::key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, handle: &DocumentHandle) -> StoreResult<()> {
        self.documents
            .put(&Self::key(&handle.id), &serde_json::to_vec(handle)?)
    }

    fn set_pinned(&self, id: &DocumentId, pinned: bool) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut handle = self
            .read(id)?
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))?;
        handle.pinned = pinned;
        self.write(&handle)
    }
}

#[async_trait]
impl<K: KvBackend> DocumentStore for LocalDocumentStore<K> {
    async fn create(
        &self,
        content: serde_json::Value,
        schema: Option<&str>,
        controller: &str,
        family: &str,
        deterministic: bool,
    ) -> StoreResult<DocumentHandle> {
        let _guard = self.write_lock.lock();
        let id = if deterministic {
            let id = Self::deterministic_id(controller, family);
            if let Some(existing) = self.read(&id)? {
                return Ok(existing);
            }
            id
        } else {
            self.unique_id(controller, family)
        };

        let handle = DocumentHandle {
            id,
            content,
            schema: schema.map(str::to_string),
            controller: controller.to_string(),
            family: family.to_string(),
            version: 0,
            updated_at: Utc::now(),
            pinned: false,
        };
        self.write(&handle)?;
        debug!(document = %handle.id, family, "Created document");
        Ok(handle)
    }

    async fn load(&self, id: &DocumentId) -> StoreResult<DocumentHandle> {
        self.read(id)?
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))
    }

    async fn update(
        &self,
        id: &DocumentId,
        content: serde_json::Value,
    ) -> StoreResult<DocumentHandle> {
        let _guard = self.write_lock.lock();
        let mut handle = self
            .read(id)?
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))?;
        handle.content = content;
        handle.version += 1;
        handle.updated_at = Utc::now();
        self.write(&handle)?;
        Ok(handle)
    }

    async fn pin(&self, id: &DocumentId) -> StoreResult<()> {
        self.set_pinned(id, true)
    }

    async fn unpin(&self, id: &DocumentId) -> StoreResult<()> {
        self.set_pinned(id, false)
    }
}

/// A document bound to a fixed schema, controller and family.
///
/// Opening the binding creates the document deterministically, so every
/// participant using the same `(controller, family)` resolves the same id.
pub struct DocumentBinding<T> {
    store: Arc<dyn DocumentStore>,
    schema: Option<String>,
    controller: String,
    family: String,
    _content: PhantomData<fn() -> T>,
}

impl<T> DocumentBinding<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(
        store: Arc<dyn DocumentStore>,
        schema: Option<String>,
        controller: impl Into<String>,
        family: impl Into<String>,
    ) -> Self {
        Self {
            store,
            schema,
            controller: controller.into(),
            family: family.into(),
            _content: PhantomData,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Create-or-load the bound document and pin it in the store.
    pub async fn open(&self) -> StoreResult<(DocumentId, T)> {
        let initial = serde_json::to_value(T::default())?;
        let handle = self
            .store
            .create(
                initial,
                self.schema.as_deref(),
                &self.controller,
                &self.family,
                true,
            )
            .await?;
        if !handle.pinned {
            self.store.pin(&handle.id).await?;
        }
        let content = serde_json::from_value(handle.content)?;
        Ok((handle.id, content))
    }

    pub async fn load(&self, id: &DocumentId) -> StoreResult<T> {
        let handle = self.store.load(id).await?;
        Ok(serde_json::from_value(handle.content)?)
    }

    pub async fn write(&self, id: &DocumentId, content: &T) -> StoreResult<()> {
        self.store
            .update(id, serde_json::to_value(content)?)
            .await?;
        Ok(())
    }
}

/// Published pointer to the current bucket root
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinsetRecord {
    /// Root directory as a content URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl PinsetRecord {
    pub fn with_root(root: &ContentId) -> Self {
        Self {
            root: Some(root.uri()),
        }
    }

    pub fn root_cid(&self) -> Option<ContentId> {
        self.root.as_deref().and_then(ContentId::from_uri)
    }
}

/// Binding for the pinset record of one asset.
pub fn pinset_binding(
    store: Arc<dyn DocumentStore>,
    asset_id: &str,
    controller: &str,
) -> DocumentBinding<PinsetRecord> {
    DocumentBinding::new(
        store,
        Some(PINSET_SCHEMA.to_string()),
        controller,
        format!("pinset:{}", asset_id),
    )
}
