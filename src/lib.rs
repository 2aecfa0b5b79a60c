//! Pinset: content-addressed bucket synchronization
//!
//! Keeps a content-addressed directory of everything an asset pins, publishes
//! its root through a versioned document, and reconciles it with a remote
//! pinning service. Mutations are serialized through a single-worker queue;
//! remote pin outcomes are tracked per content id.

pub mod backoff;
pub mod bucket;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod store;
pub mod tooling;
pub mod types;

pub use bucket::{Bucket, BucketSnapshot};
pub use config::{ConfigLoader, PinsetConfig};
pub use coordinator::PinCoordinator;
pub use error::{PinsetError, Result, StoreError};
pub use types::{ContentId, Link, LinkSet};
