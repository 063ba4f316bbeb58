//! Persistence of session state.
//!
//! State is a single JSON blob addressed by `(namespace, name)`. The file
//! backend serializes access through a sidecar lock file and replaces the blob
//! atomically, so a crash mid-write leaves the previous state intact.
//!
//! Writes from async code go through [`SessionStore::snapshot`] and
//! [`SessionStore::write`]: the snapshot is taken while the caller still holds
//! the session lock, the blocking write runs on Tokio's blocking pool after it
//! has been released.

use super::SessionManager;
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Namespace holding session state.
pub const SESSIONS_NAMESPACE: &str = "sessions";
/// Blob name of the session manager state.
pub const SESSIONS_NAME: &str = "session_manager";

/// Errors raised while reading or writing persisted state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored state is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Key-value blob storage.
///
/// Implementations may block; async callers run them on the blocking pool.
pub trait BlobStore: Send + Sync {
    /// Read a blob; `Ok(None)` when it was never written.
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace a blob.
    fn put(&self, namespace: &str, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

fn check_key(part: &str) -> Result<(), StoreError> {
    let valid = !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(part.to_string()))
    }
}

/// Exclusive lock on a blob's sidecar `.lock` file.
struct BlobLock {
    file: File,
    path: PathBuf,
}

impl BlobLock {
    fn acquire(blob_path: &Path) -> Result<Self, StoreError> {
        let path = blob_path.with_extension("lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        file.lock_exclusive().map_err(|e| StoreError::io(&path, e))?;
        Ok(Self { file, path })
    }

    fn release(self) -> Result<(), StoreError> {
        self.file.unlock().map_err(|e| StoreError::io(&self.path, e))
    }
}

/// Release `lock`, preferring the error of the guarded operation over the
/// unlock error when both failed.
fn finish<T>(lock: BlobLock, result: Result<T, StoreError>) -> Result<T, StoreError> {
    match (result, lock.release()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(unlock)) => Err(unlock),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(unlock)) => {
            tracing::warn!(error = %unlock, "Failed to release blob lock");
            Err(e)
        }
    }
}

/// Stores blobs as `<root>/<namespace>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, namespace: &str, name: &str) -> Result<PathBuf, StoreError> {
        check_key(namespace)?;
        check_key(name)?;
        Ok(self.root.join(namespace).join(format!("{name}.json")))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.blob_path(namespace, name)?;
        if !path.exists() {
            return Ok(None);
        }

        let lock = BlobLock::acquire(&path)?;
        let result = match File::open(&path).and_then(|mut file| {
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            Ok(data)
        }) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        };
        finish(lock, result)
    }

    fn put(&self, namespace: &str, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.blob_path(namespace, name)?;
        let lock = BlobLock::acquire(&path)?;

        let tmp = path.with_extension("json.tmp");
        let result = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(data)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| StoreError::io(&path, e));
        finish(lock, result)?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "Stored blob");
        Ok(())
    }
}

/// In-process blob storage, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert((namespace.to_string(), name.to_string()), data.to_vec());
        Ok(())
    }
}

/// Serialized session state, numbered in the order it was taken.
#[derive(Debug)]
pub struct Snapshot {
    seq: u64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct WriteOrder {
    /// Sequence number of the last snapshot taken.
    taken: AtomicU64,
    /// Sequence number of the last snapshot written; held across the write.
    written: tokio::sync::Mutex<u64>,
}

/// Loads and saves the [`SessionManager`] through a [`BlobStore`].
///
/// Clones share the blob store and the write order.
#[derive(Clone)]
pub struct SessionStore {
    blobs: Arc<dyn BlobStore>,
    order: Arc<WriteOrder>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            order: Arc::default(),
        }
    }

    /// Store backed by files under `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBlobStore::new(data_dir)))
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// Load persisted state.
    ///
    /// Missing or empty state yields an empty manager. Unparseable state is an
    /// error rather than being silently discarded. Blocks; call at startup.
    pub fn load(&self, default_persona: &str) -> Result<SessionManager, StoreError> {
        let Some(data) = self.blobs.get(SESSIONS_NAMESPACE, SESSIONS_NAME)? else {
            tracing::info!("No stored sessions, starting fresh");
            return Ok(SessionManager::new(default_persona));
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(SessionManager::new(default_persona));
        }

        let mut manager: SessionManager =
            serde_json::from_slice(&data).map_err(StoreError::Corrupt)?;
        manager.set_default_persona(default_persona);
        tracing::info!(sessions = manager.sessions().len(), "Restored sessions");
        Ok(manager)
    }

    /// Serialize `manager`.
    ///
    /// Take snapshots while holding whatever lock guards `manager`, so their
    /// numbering follows the order of the state changes.
    pub fn snapshot(&self, manager: &SessionManager) -> Result<Snapshot, StoreError> {
        let data = serde_json::to_vec_pretty(manager).map_err(StoreError::Serialize)?;
        let seq = self.order.taken.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Snapshot { seq, data })
    }

    /// Write `snapshot` on the blocking pool.
    ///
    /// Writes are serialized; a snapshot older than one already written is
    /// skipped so stale state never replaces newer state.
    pub async fn write(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut written = self.order.written.lock().await;
        if snapshot.seq <= *written {
            tracing::debug!(
                seq = snapshot.seq,
                written = *written,
                "Skipping stale session snapshot"
            );
            return Ok(());
        }

        let blobs = Arc::clone(&self.blobs);
        let Snapshot { seq, data } = snapshot;
        tokio::task::spawn_blocking(move || blobs.put(SESSIONS_NAMESPACE, SESSIONS_NAME, &data))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        *written = seq;
        Ok(())
    }

    /// Snapshot and write `manager` in one step.
    pub async fn save(&self, manager: &SessionManager) -> Result<(), StoreError> {
        let snapshot = self.snapshot(manager)?;
        self.write(snapshot).await
    }
}
