//! Core types for pinset bucket synchronization.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// URI scheme used when a root is recorded in the pinset document.
pub const CONTENT_URI_SCHEME: &str = "pinset://";

/// ContentId: opaque, hash-derived reference to a block in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    /// Derive the id of an encoded block (`b3` + BLAKE3 hex digest).
    pub fn for_block(encoded: &[u8]) -> Self {
        ContentId(format!("b3{}", hex::encode(blake3::hash(encoded).as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI form recorded in the pinset document, e.g. `pinset://b3...`
    pub fn uri(&self) -> String {
        format!("{}{}", CONTENT_URI_SCHEME, self.0)
    }

    /// Parse either a content URI or a bare identifier.
    pub fn from_uri(value: &str) -> Option<Self> {
        let id = value.strip_prefix(CONTENT_URI_SCHEME).unwrap_or(value).trim();
        if id.is_empty() {
            None
        } else {
            Some(ContentId(id.to_string()))
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// DocumentId: identifier of a versioned document in the document store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named entry of a directory object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub cid: ContentId,
    /// Cumulative size of the linked object in bytes
    pub size: u64,
}

impl Link {
    pub fn new(name: impl Into<String>, cid: ContentId, size: u64) -> Self {
        Self {
            name: name.into(),
            cid,
            size,
        }
    }
}

/// Size information reported by the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectStat {
    /// Size of the object including everything it links to
    pub cumulative_size: u64,
    /// Size of the object's own encoded block
    pub block_size: u64,
}

/// Links of a directory object, unique by name and kept sorted by name.
///
/// The ordering is what makes the root id deterministic for a given set
/// of entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkSet {
    links: Vec<Link>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary links; later duplicates of a name are dropped.
    pub fn from_links(links: impl IntoIterator<Item = Link>) -> Self {
        let mut set = LinkSet::new();
        for link in links {
            set.insert(link);
        }
        set
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.position(name).is_ok()
    }

    pub fn contains_cid(&self, cid: &ContentId) -> bool {
        self.links.iter().any(|l| &l.cid == cid)
    }

    pub fn get(&self, name: &str) -> Option<&Link> {
        self.position(name).ok().map(|i| &self.links[i])
    }

    /// Insert a link in name order. Returns false if the name already exists.
    pub fn insert(&mut self, link: Link) -> bool {
        match self.position(&link.name) {
            Ok(_) => false,
            Err(index) => {
                self.links.insert(index, link);
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Link> {
        self.position(name).ok().map(|i| self.links.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn cids(&self) -> impl Iterator<Item = &ContentId> {
        self.links.iter().map(|l| &l.cid)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Sum of link sizes, counting each content id once.
    pub fn unique_size(&self) -> u64 {
        let mut seen = HashSet::new();
        self.links
            .iter()
            .filter(|l| seen.insert(&l.cid))
            .map(|l| l.size)
            .sum()
    }

    pub fn as_slice(&self) -> &[Link] {
        &self.links
    }

    pub fn into_vec(self) -> Vec<Link> {
        self.links
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.links.binary_search_by(|l| l.name.as_str().cmp(name))
    }
}

impl<'a> IntoIterator for &'a LinkSet {
    type Item = &'a Link;
    type IntoIter = std::slice::Iter<'a, Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.iter()
    }
}
