//! Key-value backends for the local stores

use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Byte-oriented key-value storage shared by the local store implementations
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;
    fn contains(&self, key: &[u8]) -> StoreResult<bool>;
}

/// In-memory backend
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }
}

/// Backend over one tree of a sled database
#[derive(Clone)]
pub struct SledKv {
    tree: sled::Tree,
}

impl SledKv {
    pub fn open(db: &sled::Db, tree_name: &str) -> StoreResult<Self> {
        Ok(Self {
            tree: db.open_tree(tree_name)?,
        })
    }
}

impl KvBackend for SledKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.tree.insert(key, value)?;
        self.tree.flush()?;
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.tree.contains_key(key)?)
    }
}
