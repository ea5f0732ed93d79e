//! The object-store capability the site pipelines are built on.
//!
//! `ObjectStore` is a flat key/value blob store with prefix listing, durable
//! per-object metadata, and read-after-write consistency on single keys.
//! `MemoryStore` lives here; the on-disk backend is in `disk_store`.

use crate::models::object::{ObjectMeta, PutOptions};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{StreamExt, stream::BoxStream};
use std::{collections::BTreeMap, io};
use thiserror::Error;
use tokio::sync::RwLock;

pub(crate) const MAX_OBJECT_KEY_LEN: usize = 1024;
/// Upper bound on the buffer reserved from a recorded size; sidecars can lie.
const MAX_PREALLOC_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("corrupt metadata for `{key}`: {source}")]
    CorruptMetadata {
        key: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Streamed object payload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// An object opened for reading.
pub struct ObjectReader {
    pub meta: ObjectMeta,
    pub body: ByteStream,
}

impl ObjectReader {
    /// Drain the body into memory.
    pub async fn bytes(mut self) -> io::Result<Bytes> {
        let hint = usize::try_from(self.meta.size_bytes).unwrap_or(usize::MAX);
        let mut buf = BytesMut::with_capacity(hint.min(MAX_PREALLOC_BYTES));
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend(&self) -> &'static str;

    /// Write `body` under `key`, replacing anything already there.
    async fn put(&self, key: &str, body: Bytes, opts: PutOptions) -> StorageResult<ObjectMeta>;

    /// Open `key` for reading. `Ok(None)` when it does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<ObjectReader>>;

    /// All objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectMeta>>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Basic key validation shared by every backend.
///
/// Rejects empty or oversized keys, absolute keys, `..` and `.` segments,
/// empty segments, a trailing `/`, backslashes, and control characters
/// (NUL included).
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = || Err(StorageError::InvalidObjectKey(key.escape_debug().to_string()));
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return invalid();
    }
    if key.starts_with('/') || key.ends_with('/') {
        return invalid();
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return invalid();
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return invalid();
    }
    Ok(())
}

/// Prefixes follow the key rules except that they may be empty and end in `/`.
pub(crate) fn ensure_prefix_safe(prefix: &str) -> StorageResult<()> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() && prefix.is_empty() {
        return Ok(());
    }
    ensure_key_safe(trimmed).map_err(|_| StorageError::InvalidObjectKey(prefix.to_string()))
}

pub(crate) fn build_meta(key: &str, body: &[u8], opts: PutOptions) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        content_type: opts.content_type,
        size_bytes: body.len() as u64,
        etag: format!("{:x}", md5::compute(body)),
        uploaded_at: Utc::now(),
        metadata: opts.metadata,
    }
}

/// Volatile in-process store. Used by tests and `--backend memory`.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, (ObjectMeta, Bytes)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, body: Bytes, opts: PutOptions) -> StorageResult<ObjectMeta> {
        ensure_key_safe(key)?;
        let meta = build_meta(key, &body, opts);
        self.objects
            .write()
            .await
            .insert(key.to_string(), (meta.clone(), body));
        Ok(meta)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<ObjectReader>> {
        ensure_key_safe(key)?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|(meta, body)| {
            let body = body.clone();
            ObjectReader {
                meta: meta.clone(),
                body: futures::stream::once(async move { Ok::<_, io::Error>(body) }).boxed(),
            }
        }))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        ensure_prefix_safe(prefix)?;
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, (meta, _))| meta.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_keys() {
        for key in [
            "",
            "/abs/key",
            "a/../b",
            "a/./b",
            "a//b",
            "dir/",
            "bad/\0",
            "tab\there",
            "win\\path",
        ] {
            assert!(
                matches!(ensure_key_safe(key), Err(StorageError::InvalidObjectKey(_))),
                "accepted {key:?}"
            );
        }
        assert!(ensure_key_safe(&"a".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn accepts_nested_keys() {
        ensure_key_safe("site/deploy-1-abc/assets/app.v2.js").unwrap();
        ensure_key_safe(".readyz/sentinel").unwrap();
        ensure_prefix_safe("site/").unwrap();
        ensure_prefix_safe("").unwrap();
        assert!(ensure_prefix_safe("../").is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trip_and_prefix_listing() {
        let store = MemoryStore::new();
        let opts = PutOptions::with_content_type("text/plain").meta("projectId", "p");
        let meta = store
            .put("p/d1/a.txt", Bytes::from_static(b"alpha"), opts.clone())
            .await
            .unwrap();
        assert_eq!(meta.etag, format!("{:x}", md5::compute(b"alpha")));
        assert_eq!(meta.size_bytes, 5);
        assert_eq!(meta.metadata["projectId"], "p");

        store
            .put("p/d2/b.txt", Bytes::from_static(b"beta"), opts.clone())
            .await
            .unwrap();
        store
            .put("pp/d1/c.txt", Bytes::from_static(b"gamma"), opts)
            .await
            .unwrap();

        let reader = store.get("p/d1/a.txt").await.unwrap().unwrap();
        assert_eq!(reader.meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(reader.bytes().await.unwrap(), Bytes::from_static(b"alpha"));

        let keys: Vec<_> = store
            .list("p/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["p/d1/a.txt", "p/d2/b.txt"]);

        store.delete("p/d1/a.txt").await.unwrap();
        store.delete("p/d1/a.txt").await.unwrap();
        assert!(store.get("p/d1/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bytes_ignores_an_inflated_recorded_size() {
        let mut meta = build_meta("p/d/a.txt", b"small", PutOptions::default());
        meta.size_bytes = u64::MAX;
        let reader = ObjectReader {
            meta,
            body: futures::stream::once(async {
                Ok::<_, io::Error>(Bytes::from_static(b"small"))
            })
            .boxed(),
        };
        assert_eq!(reader.bytes().await.unwrap(), Bytes::from_static(b"small"));
    }

    #[tokio::test]
    async fn memory_store_rejects_bad_keys_on_write() {
        let store = MemoryStore::new();
        let err = store
            .put("p/d/bad/\0", Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey(_)));
        assert!(store.list("").await.unwrap().is_empty());
    }
}
