//! Blob storage for the document backend
//!
//! A blob store holds named byte objects, each tagged with a generation that
//! changes on every write. Writes take a precondition so that a
//! read-modify-write sequence can detect a concurrent writer instead of
//! silently overwriting it.

use crate::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, error};

/// Opaque version tag of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation(String);

impl Generation {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blob content with the generation it was read at
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub generation: Generation,
}

/// Condition a write must satisfy to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Unconditional overwrite
    Any,
    /// Only create; fail if the blob exists
    DoesNotExist,
    /// Only overwrite the given generation
    Matches(Generation),
}

impl WritePrecondition {
    fn check(&self, current: Option<&Generation>, location: &str) -> Result<()> {
        match (self, current) {
            (WritePrecondition::Any, _) => Ok(()),
            (WritePrecondition::DoesNotExist, None) => Ok(()),
            (WritePrecondition::DoesNotExist, Some(found)) => Err(Error::Conflict(format!(
                "{} was created concurrently (generation {})",
                location, found
            ))),
            (WritePrecondition::Matches(expected), Some(found)) if expected == found => Ok(()),
            (WritePrecondition::Matches(expected), found) => Err(Error::Conflict(format!(
                "{} changed since read (expected generation {}, found {})",
                location,
                expected,
                found.map(|g| g.to_string()).unwrap_or_else(|| "none".to_string())
            ))),
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable location of a named blob
    fn location(&self, name: &str) -> String;

    /// `Ok(None)` when the blob does not exist
    async fn read(&self, name: &str) -> Result<Option<Blob>>;

    /// Store `bytes` under `name` if `precondition` holds
    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<Generation>;
}

#[async_trait]
impl<B: BlobStore + ?Sized> BlobStore for std::sync::Arc<B> {
    fn location(&self, name: &str) -> String {
        (**self).location(name)
    }

    async fn read(&self, name: &str) -> Result<Option<Blob>> {
        (**self).read(name).await
    }

    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<Generation> {
        (**self).write(name, bytes, precondition).await
    }
}

fn content_generation(bytes: &[u8]) -> Generation {
    Generation(format!("{:x}", Sha256::digest(bytes)))
}

/// Directory-backed blob store; generation is the SHA-256 of the content
///
/// The precondition check and the rename are not one atomic step across
/// processes, so a writer racing inside that window can still win. Within
/// one process writes are serialised.
pub struct FsBlobStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn read_path(&self, path: &Path) -> Result<Option<Blob>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let generation = content_generation(&bytes);
                Ok(Some(Blob { bytes, generation }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read blob");
                Err(Error::unavailable(path.display().to_string(), e))
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn location(&self, name: &str) -> String {
        self.path_for(name).display().to_string()
    }

    async fn read(&self, name: &str) -> Result<Option<Blob>> {
        self.read_path(&self.path_for(name)).await
    }

    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<Generation> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(name);
        let location = path.display().to_string();

        let current = self.read_path(&path).await?.map(|blob| blob.generation);
        precondition.check(current.as_ref(), &location)?;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            error!(path = %self.root.display(), error = %e, "Failed to create blob directory");
            Error::unavailable(self.root.display().to_string(), e)
        })?;

        let tmp_path = self
            .root
            .join(format!(".{}.{}.tmp", name, std::process::id()));
        let generation = content_generation(&bytes);

        if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
            error!(path = %tmp_path.display(), error = %e, "Failed to write blob");
            return Err(Error::unavailable(location, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            error!(path = %path.display(), error = %e, "Failed to replace blob");
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::unavailable(location, e));
        }

        debug!(path = %path.display(), generation = %generation, "Blob written");
        Ok(generation)
    }
}

/// In-process blob store with an atomic compare-and-set
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    next_generation: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, name: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::unavailable(self.location(name), "blob service unreachable"))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, u64)>>> {
        self.blobs
            .lock()
            .map_err(|_| Error::unavailable("memory://", "blob map poisoned"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn location(&self, name: &str) -> String {
        format!("memory://{}", name)
    }

    async fn read(&self, name: &str) -> Result<Option<Blob>> {
        self.check_available(name)?;
        let blobs = self.lock()?;
        Ok(blobs.get(name).map(|(bytes, generation)| Blob {
            bytes: bytes.clone(),
            generation: Generation(generation.to_string()),
        }))
    }

    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<Generation> {
        self.check_available(name)?;
        let mut blobs = self.lock()?;
        let current = blobs
            .get(name)
            .map(|(_, generation)| Generation(generation.to_string()));
        precondition.check(current.as_ref(), &self.location(name))?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        blobs.insert(name.to_string(), (bytes, generation));
        Ok(Generation(generation.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_read_missing_is_none() {
        let store = MemoryBlobStore::new();
        assert!(store.read("quotes.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_generation_advances() {
        let store = MemoryBlobStore::new();
        let g1 = store
            .write("a", b"one".to_vec(), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        let g2 = store
            .write("a", b"two".to_vec(), WritePrecondition::Matches(g1.clone()))
            .await
            .unwrap();
        assert_ne!(g1, g2);

        let blob = store.read("a").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"two");
        assert_eq!(blob.generation, g2);
    }

    #[tokio::test]
    async fn test_memory_stale_generation_conflicts() {
        let store = MemoryBlobStore::new();
        let g1 = store.write("a", b"one".to_vec(), WritePrecondition::Any).await.unwrap();
        store
            .write("a", b"two".to_vec(), WritePrecondition::Matches(g1.clone()))
            .await
            .unwrap();

        let result = store
            .write("a", b"three".to_vec(), WritePrecondition::Matches(g1))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(store.read("a").await.unwrap().unwrap().bytes, b"two");
    }

    #[tokio::test]
    async fn test_memory_does_not_exist_conflicts_when_present() {
        let store = MemoryBlobStore::new();
        store.write("a", b"one".to_vec(), WritePrecondition::Any).await.unwrap();
        let result = store
            .write("a", b"two".to_vec(), WritePrecondition::DoesNotExist)
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_memory_unavailable() {
        let store = MemoryBlobStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.read("a").await,
            Err(Error::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_fs_round_trip_and_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert!(store.read("quotes.json").await.unwrap().is_none());

        let g1 = store
            .write("quotes.json", b"{}".to_vec(), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        let blob = store.read("quotes.json").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"{}");
        assert_eq!(blob.generation, g1);

        let stale = store
            .write(
                "quotes.json",
                b"[]".to_vec(),
                WritePrecondition::Matches(Generation::new("deadbeef")),
            )
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_fs_write_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("bucket").join("data");
        let store = FsBlobStore::new(&nested);
        store
            .write("quotes.json", b"{}".to_vec(), WritePrecondition::Any)
            .await
            .unwrap();
        assert!(nested.join("quotes.json").exists());
    }
}
