//! Local content-addressed object store
//!
//! Blocks are bincode-encoded and keyed by the id derived from their
//! encoding, so identical content always lands on the same key.

use super::kv::KvBackend;
use super::ObjectStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{ContentId, Link, LinkSet, ObjectStat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

const ARCHIVE_VERSION: u32 = 1;

/// Stored block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Raw(Vec<u8>),
    /// Links sorted by name, unique by name
    Directory(Vec<Link>),
}

impl Block {
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Exported object graph, the unit exchanged with the pinning service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphArchive {
    pub version: u32,
    pub roots: Vec<ContentId>,
    pub blocks: Vec<(ContentId, Vec<u8>)>,
}

impl GraphArchive {
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode and check every block against its id.
    pub fn decode_verified(bytes: &[u8]) -> StoreResult<Self> {
        let archive: GraphArchive = bincode::deserialize(bytes)?;
        if archive.version != ARCHIVE_VERSION {
            return Err(StoreError::Encoding(format!(
                "unsupported archive version {}",
                archive.version
            )));
        }
        for (cid, block) in &archive.blocks {
            let actual = ContentId::for_block(block);
            if &actual != cid {
                return Err(StoreError::HashMismatch {
                    expected: cid.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(archive)
    }
}

/// Object store over any [`KvBackend`]
pub struct LocalObjectStore<K: KvBackend> {
    blocks: K,
}

impl<K: KvBackend> LocalObjectStore<K> {
    pub fn new(blocks: K) -> Self {
        Self { blocks }
    }

    fn put(&self, block: &Block) -> StoreResult<(ContentId, u64)> {
        let encoded = block.encode()?;
        let cid = ContentId::for_block(&encoded);
        if !self.blocks.contains(cid.as_str().as_bytes())? {
            self.blocks.put(cid.as_str().as_bytes(), &encoded)?;
        }
        Ok((cid, encoded.len() as u64))
    }

    fn raw(&self, id: &ContentId) -> StoreResult<Vec<u8>> {
        self.blocks
            .get(id.as_str().as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("object {}", id)))
    }

    fn block(&self, id: &ContentId) -> StoreResult<(Block, u64)> {
        let bytes = self.raw(id)?;
        let size = bytes.len() as u64;
        Ok((Block::decode(&bytes)?, size))
    }

    fn directory(&self, id: &ContentId) -> StoreResult<Vec<Link>> {
        match self.block(id)?.0 {
            Block::Directory(links) => Ok(links),
            Block::Raw(_) => Err(StoreError::Encoding(format!("{} is not a directory", id))),
        }
    }
}

#[async_trait]
impl<K: KvBackend> ObjectStore for LocalObjectStore<K> {
    async fn put_block(&self, data: &[u8]) -> StoreResult<ContentId> {
        let (cid, size) = self.put(&Block::Raw(data.to_vec()))?;
        debug!(cid = %cid, size, "Stored raw block");
        Ok(cid)
    }

    async fn new_directory(&self) -> StoreResult<ContentId> {
        Ok(self.put(&Block::Directory(Vec::new()))?.0)
    }

    async fn get_links(&self, id: &ContentId) -> StoreResult<Vec<Link>> {
        self.directory(id)
    }

    async fn put_directory(&self, links: &[Link]) -> StoreResult<ContentId> {
        let links = LinkSet::from_links(links.iter().cloned()).into_vec();
        Ok(self.put(&Block::Directory(links))?.0)
    }

    async fn patch_remove_link(&self, id: &ContentId, name: &str) -> StoreResult<ContentId> {
        let mut links = LinkSet::from_links(self.directory(id)?);
        if links.remove(name).is_none() {
            return Err(StoreError::LinkNotFound {
                dir: id.clone(),
                name: name.to_string(),
            });
        }
        Ok(self.put(&Block::Directory(links.into_vec()))?.0)
    }

    async fn stat_object(&self, id: &ContentId) -> StoreResult<ObjectStat> {
        let (block, block_size) = self.block(id)?;
        let linked: u64 = match &block {
            Block::Raw(_) => 0,
            Block::Directory(links) => links.iter().map(|l| l.size).sum(),
        };
        Ok(ObjectStat {
            cumulative_size: block_size + linked,
            block_size,
        })
    }

    async fn export_graph(&self, id: &ContentId) -> StoreResult<Vec<u8>> {
        let mut seen = HashSet::new();
        let mut stack = vec![id.clone()];
        let mut blocks = Vec::new();

        while let Some(cid) = stack.pop() {
            if !seen.insert(cid.clone()) {
                continue;
            }
            let bytes = self.raw(&cid)?;
            if let Block::Directory(links) = Block::decode(&bytes)? {
                stack.extend(links.into_iter().map(|l| l.cid));
            }
            blocks.push((cid, bytes));
        }

        debug!(root = %id, blocks = blocks.len(), "Exported object graph");
        GraphArchive {
            version: ARCHIVE_VERSION,
            roots: vec![id.clone()],
            blocks,
        }
        .encode()
    }

    async fn import_graph(&self, data: &[u8]) -> StoreResult<Vec<ContentId>> {
        let archive = GraphArchive::decode_verified(data)?;
        for (cid, bytes) in &archive.blocks {
            self.blocks.put(cid.as_str().as_bytes(), bytes)?;
        }
        debug!(
            roots = archive.roots.len(),
            blocks = archive.blocks.len(),
            "Imported object graph"
        );
        Ok(archive.roots)
    }
}
