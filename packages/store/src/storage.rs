//! Durable snapshot storage.
//!
//! A snapshot is persisted as a single JSON blob holding the raw feed
//! objects and the time their fetch completed. Writes go to a sibling temp
//! file that is renamed over the previous blob, so a failed write never
//! damages the last good copy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crime_radius_incident_models::CacheSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PersistError;
use crate::paths::temp_path;

/// Where snapshots survive process restarts.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Last modification time of the stored blob, if known.
    ///
    /// Used as a staleness proxy before the blob is read.
    async fn modified(&self) -> Option<DateTime<Utc>>;

    /// Reads the stored snapshot. `Ok(None)` means nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the blob exists but cannot be read or
    /// decoded.
    async fn read(&self) -> Result<Option<CacheSnapshot>, PersistError>;

    /// Replaces the stored snapshot wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the write fails. The previous blob is
    /// left untouched in that case.
    async fn write(&self, snapshot: Arc<CacheSnapshot>) -> Result<(), PersistError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSnapshotRef<'a> {
    incidents: Vec<&'a Map<String, Value>>,
    fetched_at: DateTime<Utc>,
    download_date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSnapshot {
    incidents: Vec<Map<String, Value>>,
    fetched_at: DateTime<Utc>,
}

/// Encodes a snapshot in the durable JSON format.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if serialization fails.
pub fn encode_snapshot(snapshot: &CacheSnapshot) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&PersistedSnapshotRef {
        incidents: snapshot.incidents().iter().map(|r| &r.fields).collect(),
        fetched_at: snapshot.fetched_at(),
        download_date: Utc::now().to_rfc3339(),
    })
}

/// Decodes a snapshot from the durable JSON format, re-deriving record
/// identifiers and coordinates.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the blob is not a valid snapshot.
pub fn decode_snapshot(bytes: &[u8]) -> Result<CacheSnapshot, serde_json::Error> {
    let persisted: PersistedSnapshot = serde_json::from_slice(bytes)?;
    Ok(CacheSnapshot::from_raw(
        persisted.incidents,
        persisted.fetched_at,
    ))
}

/// Snapshot storage backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStorage {
    path: PathBuf,
}

impl FileSnapshotStorage {
    /// Stores snapshots at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The blob's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStorage for FileSnapshotStorage {
    async fn modified(&self) -> Option<DateTime<Utc>> {
        let metadata = tokio::fs::metadata(&self.path).await.ok()?;
        metadata.modified().ok().map(DateTime::<Utc>::from)
    }

    async fn read(&self) -> Result<Option<CacheSnapshot>, PersistError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot = tokio::task::spawn_blocking(move || decode_snapshot(&bytes))
            .await
            .map_err(|e| PersistError::Task {
                message: e.to_string(),
            })??;
        Ok(Some(snapshot))
    }

    async fn write(&self, snapshot: Arc<CacheSnapshot>) -> Result<(), PersistError> {
        let bytes = tokio::task::spawn_blocking(move || encode_snapshot(&snapshot))
            .await
            .map_err(|e| PersistError::Task {
                message: e.to_string(),
            })??;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = temp_path(&self.path);
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                log::debug!("Could not remove {}: {cleanup}", tmp.display());
            }
            return Err(e.into());
        }

        log::debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }
}

/// Snapshot storage that lives only as long as the process.
///
/// Used when durable persistence is disabled.
#[derive(Debug, Default)]
pub struct MemorySnapshotStorage {
    slot: Mutex<Option<(Arc<CacheSnapshot>, DateTime<Utc>)>>,
    writes: AtomicUsize,
}

impl MemorySnapshotStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage already holding `snapshot`, as if written at its
    /// fetch time.
    #[must_use]
    pub fn seeded(snapshot: CacheSnapshot) -> Self {
        let modified = snapshot.fetched_at();
        Self {
            slot: Mutex::new(Some((Arc::new(snapshot), modified))),
            writes: AtomicUsize::new(0),
        }
    }

    /// The stored snapshot, if any.
    #[must_use]
    pub fn stored(&self) -> Option<Arc<CacheSnapshot>> {
        self.lock().as_ref().map(|(snapshot, _)| Arc::clone(snapshot))
    }

    /// Number of successful writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Arc<CacheSnapshot>, DateTime<Utc>)>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SnapshotStorage for MemorySnapshotStorage {
    async fn modified(&self) -> Option<DateTime<Utc>> {
        self.lock().as_ref().map(|(_, modified)| *modified)
    }

    async fn read(&self) -> Result<Option<CacheSnapshot>, PersistError> {
        Ok(self.lock().as_ref().map(|(snapshot, _)| (**snapshot).clone()))
    }

    async fn write(&self, snapshot: Arc<CacheSnapshot>) -> Result<(), PersistError> {
        *self.lock() = Some((snapshot, Utc::now()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
