//! In-memory object store used by tests and lightweight embedders.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{ByteStream, ObjectId, ObjectStat, ObjectStore, PointerRecord, PointerStore, StoredObject};
use crate::error::{Error, Result};

const STREAM_CHUNK: usize = 64 * 1024;

/// Content-addressed in-memory store with a mutable pointer table.
///
/// Pointer behavior is configurable so resolver tests can simulate slow
/// or failing network lookups.
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, Bytes>>,
    pointers: RwLock<HashMap<String, PointerRecord>>,
    stream_put: bool,
    pointer_delay: Option<Duration>,
    pointer_failure: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            pointers: RwLock::new(HashMap::new()),
            stream_put: true,
            pointer_delay: None,
            pointer_failure: false,
        }
    }

    /// Disables native stream ingestion, forcing callers through the
    /// temp-file path.
    pub fn without_stream_put(mut self) -> Self {
        self.stream_put = false;
        self
    }

    /// Delays every pointer lookup, simulating a slow network.
    pub fn with_pointer_delay(mut self, delay: Duration) -> Self {
        self.pointer_delay = Some(delay);
        self
    }

    /// Makes every pointer lookup fail, simulating a broken network.
    pub fn with_pointer_failure(mut self) -> Self {
        self.pointer_failure = true;
        self
    }

    /// Seeds a pointer with an explicit publish timestamp.
    pub async fn set_pointer(&self, name: &str, value: ObjectId, created_at: DateTime<Utc>) {
        self.pointers
            .write()
            .await
            .insert(name.to_string(), PointerRecord { value, created_at });
    }

    async fn insert(&self, bytes: Bytes) -> StoredObject {
        let id = ObjectId::from_content(&bytes);
        let size = bytes.len() as u64;
        self.objects.write().await.insert(id.clone(), bytes);
        StoredObject::new(id, size)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct DirEntry<'a> {
    path: &'a str,
    id: &'a ObjectId,
    size: u64,
}

#[async_trait]
impl PointerStore for MemoryStore {
    async fn publish_pointer(&self, id: &ObjectId, key: &str) -> Result<String> {
        if self.pointer_failure {
            return Err(Error::Pointer("publish unavailable".into()));
        }
        self.pointers.write().await.insert(
            key.to_string(),
            PointerRecord {
                value: id.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(key.to_string())
    }

    async fn resolve_pointer(&self, name: &str) -> Result<PointerRecord> {
        if let Some(delay) = self.pointer_delay {
            tokio::time::sleep(delay).await;
        }
        if self.pointer_failure {
            return Err(Error::Pointer("lookup unavailable".into()));
        }
        self.pointers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pointer {name}")))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn supports_stream_put(&self) -> bool {
        self.stream_put
    }

    async fn put_stream(&self, mut stream: ByteStream) -> Result<StoredObject> {
        if !self.stream_put {
            return Err(Error::Store("stream ingestion not supported".into()));
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.try_next().await.map_err(Error::from_stream)? {
            buf.extend_from_slice(&chunk);
        }
        Ok(self.insert(buf.freeze()).await)
    }

    async fn put_bytes(&self, bytes: Bytes) -> Result<StoredObject> {
        Ok(self.insert(bytes).await)
    }

    async fn put_file(&self, path: &Path) -> Result<StoredObject> {
        let bytes = tokio::fs::read(path).await?;
        Ok(self.insert(bytes.into()).await)
    }

    async fn put_directory(&self, path: &Path) -> Result<StoredObject> {
        let mut files = Vec::new();
        collect_files(path, path, &mut files)?;
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut total = 0u64;
        let mut entries = Vec::with_capacity(files.len());
        for (rel, abs) in &files {
            let stored = self.put_file(abs).await?;
            total += stored.size;
            entries.push((rel.clone(), stored.id, stored.size));
        }

        let listing = serde_json::to_vec(
            &entries
                .iter()
                .map(|(path, id, size)| DirEntry {
                    path,
                    id,
                    size: *size,
                })
                .collect::<Vec<_>>(),
        )?;
        let id = ObjectId::from_content(&listing);
        self.objects
            .write()
            .await
            .insert(id.clone(), listing.into());

        Ok(StoredObject::new(id, total))
    }

    async fn get(&self, id: &ObjectId) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object {id}")))
    }

    async fn get_stream(&self, id: &ObjectId) -> Result<ByteStream> {
        let bytes = self.get(id).await?;
        let chunks: Vec<std::io::Result<Bytes>> = bytes
            .chunks(STREAM_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn stat(&self, id: &ObjectId) -> Result<ObjectStat> {
        let objects = self.objects.read().await;
        let bytes = objects
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("object {id}")))?;
        Ok(ObjectStat {
            size: bytes.len() as u64,
        })
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, std::path::PathBuf)>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            out.push((rel, path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_bytes_share_an_id() {
        let store = MemoryStore::new();
        let a = store.put_bytes(Bytes::from_static(b"hello")).await.unwrap();
        let b = store.put_bytes(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(a.id, b.id);

        let c = store.put_bytes(Bytes::from_static(b"other")).await.unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn stat_reports_stored_size() {
        let store = MemoryStore::new();
        let obj = store.put_bytes(Bytes::from(vec![0u8; 1234])).await.unwrap();
        assert_eq!(store.stat(&obj.id).await.unwrap().size, 1234);
    }
}
