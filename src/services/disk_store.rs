//! src/services/disk_store.rs
//!
//! DiskStore: the `ObjectStore` backend used in production. Payloads live
//! under `root/objects/{key}` and their metadata as JSON sidecars under
//! `root/meta/{key}.json`. Writes go to a temp file that is fsynced and then
//! renamed into place, so a key is either absent or complete.

use crate::{
    models::object::{ObjectMeta, PutOptions},
    services::object_store::{
        ObjectReader, ObjectStore, StorageError, StorageResult, build_meta, ensure_key_safe,
        ensure_prefix_safe,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";
const META_SUFFIX: &str = ".json";

#[derive(Clone, Debug)]
pub struct DiskStore {
    /// Base directory holding the `objects/` and `meta/` trees.
    pub base_path: PathBuf,
}

impl DiskStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn objects_root(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    fn meta_root(&self) -> PathBuf {
        self.base_path.join("meta")
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.objects_root().join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.meta_root().join(format!("{key}{META_SUFFIX}"))
    }

    /// Write `data` to `path` atomically: temp file in the same directory,
    /// flush + fsync, then rename over the destination.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));

        let result: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match fs::read(self.meta_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|source| StorageError::CorruptMetadata {
                    key: key.to_string(),
                    source,
                }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Remove `path`, treating an already-missing file as success.
    async fn remove_if_present(path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(_) => {
                debug!("removed {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Recursively remove empty directories up to `stop`.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Collect every sidecar key below `dir`, relative to the meta root.
    async fn walk_meta_keys(&self, dir: PathBuf) -> StorageResult<Vec<String>> {
        let meta_root = self.meta_root();
        let mut keys = Vec::new();
        let mut pending = vec![dir];
        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy();
                // in-flight temp files never carry the sidecar suffix
                if !name.ends_with(META_SUFFIX) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&meta_root) else {
                    continue;
                };
                let relative = relative.to_string_lossy().replace('\\', "/");
                if let Some(key) = relative.strip_suffix(META_SUFFIX) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for DiskStore {
    fn backend(&self) -> &'static str {
        "disk"
    }

    async fn put(&self, key: &str, body: Bytes, opts: PutOptions) -> StorageResult<ObjectMeta> {
        ensure_key_safe(key)?;
        let meta = build_meta(key, &body, opts);

        Self::write_atomic(&self.object_path(key), &body).await?;
        let encoded = serde_json::to_vec(&meta).map_err(|source| {
            StorageError::CorruptMetadata {
                key: key.to_string(),
                source,
            }
        })?;
        if let Err(err) = Self::write_atomic(&self.meta_path(key), &encoded).await {
            let _ = fs::remove_file(self.object_path(key)).await;
            return Err(err);
        }

        Ok(meta)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<ObjectReader>> {
        ensure_key_safe(key)?;
        let Some(meta) = self.read_meta(key).await? else {
            return Ok(None);
        };

        let file = match File::open(self.object_path(key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(Some(ObjectReader {
            meta,
            body: ReaderStream::new(file).boxed(),
        }))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        ensure_prefix_safe(prefix)?;
        // Only the directory part of the prefix can narrow the walk.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let walk_root = if dir_part.is_empty() {
            self.meta_root()
        } else {
            self.meta_root().join(dir_part)
        };

        let mut keys: Vec<String> = self
            .walk_meta_keys(walk_root)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(meta) = self.read_meta(&key).await? {
                objects.push(meta);
            }
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let object_path = self.object_path(key);
        let meta_path = self.meta_path(key);

        Self::remove_if_present(&object_path).await?;
        Self::remove_if_present(&meta_path).await?;

        if let Some(parent) = object_path.parent() {
            Self::prune_empty_dirs(parent, &self.objects_root()).await;
        }
        if let Some(parent) = meta_path.parent() {
            Self::prune_empty_dirs(parent, &self.meta_root()).await;
        }
        Ok(())
    }
}
