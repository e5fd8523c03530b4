// # File Store
//
// File-based implementation of DurableStore with crash recovery.
//
// ## Purpose
//
// Keeps pending updates, run lock flags and queued drains across restarts,
// so an accepted update is never lost to a crash or redeploy.
//
// ## Crash Recovery
//
// - Atomic writes: every change is written to a temporary file, then renamed
// - Write-ahead of memory: a change becomes visible only after it is on disk
// - Automatic backup: keeps `.backup` of the previous state
// - Recovery: falls back to the backup if the main file is corrupted
// - Messages that were in flight when the process died are delivered again
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "table": {
//     "last_versionstamp": 42,
//     "last_message_id": 7,
//     "entries": [
//       { "key": ["toUpdate", "a.example.com", "A"], "value": "1.2.3.4", "versionstamp": 41 }
//     ],
//     "queue": [
//       { "id": 7, "payload": { "kind": "update", "attempt": 1, "skip_lock": true },
//         "ready_at": "2025-01-09T12:00:10Z", "deliveries": 0 }
//     ]
//   }
// }
// ```

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};

use super::table::{self, Table, TableImage};
use crate::Error;
use crate::traits::durable_store::{
    AtomicWrite, CommitOutcome, Delivery, DurableStore, Entry, Key, MessageId,
};

/// Store file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-based durable store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use ddns_relay_core::state::FileStore;
/// use ddns_relay_core::traits::{AtomicWrite, DurableStore, Key};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/ddns-relay/store.json").await?;
///
///     // Atomically written to disk before commit returns
///     let key = Key::from(["toUpdate", "a.example.com", "A"]);
///     store.commit(AtomicWrite::new().set(key.clone(), "1.2.3.4".into())).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: Mutex<Table>,
    notify: Notify,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    table: TableImage,
}

/// Why a store file could not be loaded
enum LoadFailure {
    /// The file exists but does not parse
    Corrupt(String),
    /// The file could not be read at all
    Unreadable(Error),
}

impl FileStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing store file
    /// 3. If it is corrupted, try to load the backup
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let image = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            table: Mutex::new(Table::from_image(image)),
            notify: Notify::new(),
        })
    }

    /// Load the store image with automatic recovery
    async fn load_with_recovery(path: &Path) -> Result<TableImage, Error> {
        match Self::load(path).await {
            Ok(image) => {
                tracing::debug!(
                    "Loaded store from file: {} entries, {} queued messages",
                    image.entry_count(),
                    image.message_count()
                );
                Ok(image)
            }
            Err(LoadFailure::Unreadable(e)) => Err(e),
            Err(LoadFailure::Corrupt(reason)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    reason
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(TableImage::default());
                }

                match Self::load(&backup_path).await {
                    Ok(image) => {
                        tracing::info!(
                            "Recovered store from backup: {} entries, {} queued messages",
                            image.entry_count(),
                            image.message_count()
                        );
                        if let Err(e) = fs::copy(&backup_path, path).await {
                            tracing::error!("Failed to restore store file from backup: {}", e);
                        }
                        Ok(image)
                    }
                    Err(LoadFailure::Corrupt(reason)) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty store.",
                            reason
                        );
                        Ok(TableImage::default())
                    }
                    Err(LoadFailure::Unreadable(e)) => Err(e),
                }
            }
        }
    }

    /// Load a store image from one file
    async fn load(path: &Path) -> Result<TableImage, LoadFailure> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(TableImage::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadFailure::Unreadable(Error::store(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadFailure::Corrupt(format!("{}: {}", path.display(), e))
        })?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.table)
    }

    /// Write a table image to disk atomically
    async fn write_image(&self, image: TableImage) -> Result<(), Error> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            table: image,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply `change` to a copy of the table, persist the copy, then publish it
    ///
    /// The lock is held across the write so that file order matches commit order.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Table) -> (T, bool),
    ) -> Result<T, Error> {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let (result, changed) = change(&mut next);
        if changed {
            self.write_image(next.image()).await?;
            *table = next;
        }
        Ok(result)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &Key) -> Result<Entry, Error> {
        Ok(self.table.lock().await.get(key))
    }

    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, Error> {
        let table = self.table.lock().await;
        Ok(keys.iter().map(|key| table.get(key)).collect())
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Entry>, Error> {
        Ok(self.table.lock().await.list(prefix))
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, Error> {
        let enqueues = !write.enqueues.is_empty();
        let outcome = self
            .mutate(|table| {
                let outcome = table.apply(write, Utc::now());
                (outcome, outcome.is_committed())
            })
            .await?;
        if enqueues && outcome.is_committed() {
            self.notify.notify_waiters();
        }
        Ok(outcome)
    }

    async fn receive(&self) -> Result<Delivery, Error> {
        // In-flight markers are memory-only; nothing to persist here.
        Ok(table::wait_for_delivery(&self.table, &self.notify).await)
    }

    async fn ack(&self, id: MessageId) -> Result<(), Error> {
        let found = self
            .mutate(|table| {
                let found = table.ack(id);
                (found, found)
            })
            .await?;
        if !found {
            tracing::debug!("ack for unknown message {}", id);
        }
        Ok(())
    }

    async fn nack(&self, id: MessageId, delay: Duration) -> Result<(), Error> {
        let found = self
            .mutate(|table| {
                let found = table.nack(id, delay, Utc::now());
                (found, found)
            })
            .await?;
        if found {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let image = self.table.lock().await.image();
        self.write_image(image).await
    }
}
