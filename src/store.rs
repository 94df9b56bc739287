use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::Error;
use crate::lane::Lane;

pub const STORAGE_FILE_NAME: &str = "storage.json";

/// Last known size of every document that has been observed at least once.
pub type SizeRecord = BTreeMap<String, i64>;

/// Sizes fetched during one check, in the order the URLs were configured.
pub type ObservationBatch = Vec<(String, i64)>;

/// URLs whose size differs from the previously recorded one.
pub type ChangeSet = Vec<String>;

/// Remembers the last observed size of each document and reports changes.
///
/// The in-memory map is authoritative. Every update queues a snapshot of it on
/// a dedicated writer lane, so writes to disk happen one at a time and in the
/// order the updates were applied.
pub struct ChangeStore {
    path: PathBuf,
    sizes: Mutex<SizeRecord>,
    writer: Lane,
}

impl ChangeStore {
    /// Opens the store backed by `path`, loading whatever valid entries it
    /// already holds. A missing or unreadable file starts an empty store.
    ///
    /// Reads the file synchronously. This only happens once, at startup,
    /// before any lane has work to do.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sizes = load(&path);

        Self {
            path,
            sizes: Mutex::new(sizes),
            writer: Lane::new("storage"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a batch of freshly observed sizes and returns the URLs whose
    /// size changed. A URL seen for the first time is recorded but never
    /// reported as changed.
    pub fn update(&self, batch: ObservationBatch) -> ChangeSet {
        let mut changed = ChangeSet::new();
        let mut sizes = self.sizes.lock().unwrap_or_else(PoisonError::into_inner);

        for (url, size) in batch {
            match sizes.insert(url.clone(), size) {
                Some(previous) if previous != size => {
                    debug!("{url} changed size: {previous} -> {size}");
                    changed.push(url);
                }
                Some(_) => {}
                None => debug!("First observation of {url}: {size}"),
            }
        }

        // Queued under the lock so snapshots reach the writer in update order
        self.persist(sizes.clone());
        changed
    }

    /// A copy of the current in-memory map.
    pub fn snapshot(&self) -> SizeRecord {
        self.sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until every snapshot queued so far has been written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaneClosed`] if the store has been shut down.
    pub async fn flush(&self) -> Result<(), Error> {
        self.writer.submit(|| async { Ok(()) })?.join().await
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.flush().await {
            warn!("Could not flush storage before shutdown: {e}");
        }
        self.writer.shutdown().await;
    }

    fn persist(&self, snapshot: SizeRecord) {
        let path = self.path.clone();

        let submitted = self.writer.submit(move || async move {
            let result = write_snapshot(&path, &snapshot).await;
            if let Err(e) = &result {
                error!("{e}");
            }
            result
        });

        // Nobody waits on the write, the handle is only needed by flush()
        match submitted {
            Ok(_handle) => {}
            Err(e) => warn!("Sizes were not persisted: {e}"),
        }
    }
}

fn load(path: &Path) -> SizeRecord {
    let mut sizes = SizeRecord::new();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No existing storage file found at {}", path.display());
            return sizes;
        }
        Err(e) => {
            error!("Failed to read storage file {}: {e}", path.display());
            return sizes;
        }
    };

    let entries = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(entries)) => entries,
        Ok(other) => {
            error!(
                "Storage file {} does not hold a JSON object, ignoring it: {other}",
                path.display()
            );
            return sizes;
        }
        Err(e) => {
            error!("Failed to parse storage file {}: {e}", path.display());
            return sizes;
        }
    };

    for (url, value) in entries {
        match value.as_i64() {
            Some(size) if !url.is_empty() => {
                sizes.insert(url, size);
            }
            _ => warn!("Invalid entry in the storage file: <{url:?}, {value}>"),
        }
    }

    info!(
        "Loaded {} recorded size(s) from {}",
        sizes.len(),
        path.display()
    );
    sizes
}

/// Writes to a sibling temp file and renames it into place, so the file on
/// disk always holds a complete snapshot.
async fn write_snapshot(path: &Path, snapshot: &SizeRecord) -> Result<(), Error> {
    let failed = |source| Error::PersistenceFailed {
        path: path.to_path_buf(),
        source,
    };

    let content = serde_json::to_vec_pretty(snapshot).map_err(|e| failed(e.into()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content).await.map_err(failed)?;
    tokio::fs::rename(&tmp, path).await.map_err(failed)?;

    debug!("Persisted {} size(s) to {}", snapshot.len(), path.display());
    Ok(())
}
