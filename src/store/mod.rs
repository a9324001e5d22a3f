//! Object store boundary.
//!
//! The core never implements the store's persistence format; it consumes
//! immutable content-addressed objects through the traits below. An
//! in-memory implementation ships for tests and embedders without a
//! backing node.

pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::MemoryStore;

/// The single stream representation used across the core. All ingestion
/// inputs are normalized into this before hitting the store or drivers.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A content address. Identical bytes always produce an identical id.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives an id from raw content bytes (SHA-256, hex).
    pub fn from_content(content: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// A temp file or directory backing a stored object, removed on drop.
/// Exclusively owned by the call that created it.
#[derive(Debug)]
pub enum TempArtifact {
    File(tempfile::TempPath),
    Dir(tempfile::TempDir),
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        match self {
            TempArtifact::File(p) => p,
            TempArtifact::Dir(d) => d.path(),
        }
    }
}

/// An immutable stored object, owned by the caller until released.
#[derive(Debug)]
pub struct StoredObject {
    pub id: ObjectId,
    pub size: u64,
    /// Local materialization of the object, when one exists.
    pub local_path: Option<PathBuf>,
    /// Scoped temp backing; dropping the object removes it.
    pub cleanup: Option<TempArtifact>,
}

impl StoredObject {
    pub fn new(id: ObjectId, size: u64) -> Self {
        Self {
            id,
            size,
            local_path: None,
            cleanup: None,
        }
    }
}

/// Authoritative object metadata, re-read after every persist since
/// store-side chunking may disagree with bytes counted mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
}

/// A resolved mutable pointer with the network-side publish timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRecord {
    pub value: ObjectId,
    pub created_at: DateTime<Utc>,
}

/// Mutable-pointer operations of the store (network name system).
#[async_trait]
pub trait PointerStore: Send + Sync {
    /// Publishes `id` under the keypair named `key`, returning the stable
    /// name. Best-effort from the caller's perspective.
    async fn publish_pointer(&self, id: &ObjectId, key: &str) -> Result<String>;

    /// Looks the stable name up on the network. Eventually consistent;
    /// may be slow or fail outright.
    async fn resolve_pointer(&self, name: &str) -> Result<PointerRecord>;
}

/// Immutable object operations of the store.
#[async_trait]
pub trait ObjectStore: PointerStore {
    /// Whether the store can ingest a live byte stream. When it cannot,
    /// callers materialize a temp file and use [`ObjectStore::put_file`].
    fn supports_stream_put(&self) -> bool {
        true
    }

    async fn put_stream(&self, stream: ByteStream) -> Result<StoredObject>;

    async fn put_bytes(&self, bytes: Bytes) -> Result<StoredObject>;

    async fn put_file(&self, path: &Path) -> Result<StoredObject>;

    /// Packs a directory into a single directory object.
    async fn put_directory(&self, path: &Path) -> Result<StoredObject>;

    async fn get(&self, id: &ObjectId) -> Result<Bytes>;

    async fn get_stream(&self, id: &ObjectId) -> Result<ByteStream>;

    async fn stat(&self, id: &ObjectId) -> Result<ObjectStat>;
}
