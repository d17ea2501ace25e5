// # File Notification Ledger
//
// File-based implementation of NotificationLedger with crash recovery.
//
// ## Sharing
//
// The file is the only source of truth. Every operation takes an OS lock on
// a sibling `.lock` file: shared for reads, exclusive for the
// reload-modify-write cycle of a mutation. Several processes (one `keyrotd`
// per request, a concurrent `keyrotd ledger clear`) can therefore use the
// same ledger without losing each other's records.
//
// ## Crash Recovery
//
// - Atomic writes: write to a temp file, then rename over the ledger
// - Automatic backup: the previous good file is kept as `.backup`
// - Recovery: falls back to the backup if the ledger fails to parse
//
// ## Cancellation
//
// File I/O runs on the blocking pool. Dropping the calling future does not
// stop a mutation that already started; it runs to the rename, so the file
// holds either the old or the new document.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "notifications": [
//     { "key_index": 5, "notified_at": "2025-01-09T12:00:00Z" }
//   ]
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::Error;
use crate::traits::notification_ledger::{NotificationLedger, NotificationRecord};

/// Ledger file format version
const LEDGER_FILE_VERSION: &str = "1.0";

type Records = BTreeMap<usize, NotificationRecord>;

/// File-based notification ledger with crash recovery
///
/// Clones and separately opened instances on the same path all see the same
/// records.
///
/// # Example
///
/// ```rust,no_run
/// use keyrot_core::ledger::FileNotificationLedger;
/// use keyrot_core::traits::NotificationLedger;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ledger = FileNotificationLedger::open("/var/lib/keyrot/ledger.json").await?;
///
///     ledger.mark_notified(5).await?;
///     assert!(ledger.has_notified(5).await?);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileNotificationLedger {
    inner: Arc<LedgerFile>,
}

#[derive(Debug)]
struct LedgerFile {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Serializable ledger file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct LedgerFileFormat {
    version: String,
    notifications: Vec<NotificationRecord>,
}

/// Records read from disk
struct Snapshot {
    records: Records,
    /// False when the main file was unreadable and the backup was used
    healthy: bool,
}

impl FileNotificationLedger {
    /// Create or load a file ledger
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing ledger file
    /// 3. If it fails to parse, load the backup
    /// 4. If both fail, start empty
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create ledger directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let ledger = Self {
            inner: Arc::new(LedgerFile {
                lock_path: lock_path(&path),
                path,
            }),
        };

        let records = ledger.records().await?;
        tracing::debug!("Loaded ledger from file: {} records", records.len());
        Ok(ledger)
    }

    /// Path of the ledger file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current records, read from disk
    async fn records(&self) -> Result<Records, Error> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.read())
            .await
            .map_err(|e| Error::ledger(format!("Ledger read task failed: {}", e)))?
    }

    /// Apply a mutation on the blocking pool
    ///
    /// `op` returns whether it changed anything; unchanged ledgers are not
    /// rewritten.
    async fn mutate<F>(&self, op: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut Records) -> bool + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.apply(op))
            .await
            .map_err(|e| Error::ledger(format!("Ledger write task failed: {}", e)))?
    }
}

impl LedgerFile {
    fn open_lock_file(&self) -> Result<fs::File, Error> {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| {
                Error::ledger(format!(
                    "Failed to open lock file {}: {}",
                    self.lock_path.display(),
                    e
                ))
            })
    }

    fn read(&self) -> Result<Records, Error> {
        let lock = fd_lock::RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .read()
            .map_err(|e| Error::ledger(format!("Failed to acquire ledger read lock: {}", e)))?;

        Ok(load_with_recovery(&self.path)?.records)
    }

    fn apply<F>(&self, op: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut Records) -> bool,
    {
        let mut lock = fd_lock::RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .write()
            .map_err(|e| Error::ledger(format!("Failed to acquire ledger write lock: {}", e)))?;

        // reload under the lock; another process may have written since
        let Snapshot { mut records, healthy } = load_with_recovery(&self.path)?;
        if !op(&mut records) {
            return Ok(false);
        }

        self.write_records(&records, healthy)?;
        Ok(true)
    }

    /// Write records to disk atomically
    ///
    /// The current file becomes the backup only if it was readable.
    fn write_records(&self, records: &Records, refresh_backup: bool) -> Result<(), Error> {
        let ledger_file = LedgerFileFormat {
            version: LEDGER_FILE_VERSION.to_string(),
            notifications: records.values().cloned().collect(),
        };

        let json = serde_json::to_string_pretty(&ledger_file)
            .map_err(|e| Error::ledger(format!("Failed to serialize ledger: {}", e)))?;

        let temp_path = temp_path(&self.path);
        {
            let mut file = fs::File::create(&temp_path).map_err(|e| {
                Error::ledger(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).map_err(|e| {
                Error::ledger(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().map_err(|e| {
                Error::ledger(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if refresh_backup
            && self.path.exists()
            && let Err(e) = fs::copy(&self.path, backup_path(&self.path))
        {
            tracing::warn!("Failed to create ledger backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            Error::ledger(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Ledger written to file: {}", self.path.display());
        Ok(())
    }
}

/// Load the ledger, falling back to the backup if the main file is corrupted
///
/// A recovered ledger is not written back here; the next mutation replaces
/// the corrupted file.
fn load_with_recovery(path: &Path) -> Result<Snapshot, Error> {
    match load_records(path) {
        Ok(records) => Ok(Snapshot {
            records,
            healthy: true,
        }),
        Err(Error::Json(e)) => {
            tracing::warn!(
                "Ledger file {} appears corrupted: {}. Attempting recovery from backup.",
                path.display(),
                e
            );

            let backup = backup_path(path);
            if !backup.exists() {
                tracing::warn!("No ledger backup found. Starting with empty ledger.");
                return Ok(Snapshot {
                    records: Records::new(),
                    healthy: false,
                });
            }

            let records = match load_records(&backup) {
                Ok(records) => {
                    tracing::info!("Recovered ledger from backup: {} records", records.len());
                    records
                }
                Err(backup_err) => {
                    tracing::error!(
                        "Ledger backup also unreadable: {}. Starting with empty ledger.",
                        backup_err
                    );
                    Records::new()
                }
            };
            Ok(Snapshot {
                records,
                healthy: false,
            })
        }
        Err(e) => Err(e),
    }
}

/// Load records from one file; a missing file is an empty ledger
fn load_records(path: &Path) -> Result<Records, Error> {
    if !path.exists() {
        tracing::trace!("Ledger file does not exist: {}", path.display());
        return Ok(Records::new());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::ledger(format!(
            "Failed to read ledger file {}: {}",
            path.display(),
            e
        ))
    })?;

    let ledger_file: LedgerFileFormat = serde_json::from_str(&content)?;

    if ledger_file.version != LEDGER_FILE_VERSION {
        tracing::warn!(
            "Ledger file version mismatch: expected {}, got {}. Attempting to load anyway.",
            LEDGER_FILE_VERSION,
            ledger_file.version
        );
    }

    let mut records = Records::new();
    for record in ledger_file.notifications {
        // first record wins
        records.entry(record.key_index).or_insert(record);
    }
    Ok(records)
}

fn sibling_path(path: &Path, extension: &str) -> PathBuf {
    let mut sibling = path.to_path_buf();
    sibling.set_extension(extension);
    sibling
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_path(path, "tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    sibling_path(path, "backup")
}

fn lock_path(path: &Path) -> PathBuf {
    sibling_path(path, "lock")
}

#[async_trait]
impl NotificationLedger for FileNotificationLedger {
    async fn has_notified(&self, key_index: usize) -> Result<bool, Error> {
        Ok(self.records().await?.contains_key(&key_index))
    }

    async fn mark_notified(&self, key_index: usize) -> Result<(), Error> {
        let inserted = self
            .mutate(move |records| {
                if records.contains_key(&key_index) {
                    return false;
                }
                records.insert(key_index, NotificationRecord::now(key_index));
                true
            })
            .await?;

        if inserted {
            tracing::debug!("Ledger marked key index {} as notified", key_index);
        }
        Ok(())
    }

    async fn get_record(&self, key_index: usize) -> Result<Option<NotificationRecord>, Error> {
        Ok(self.records().await?.remove(&key_index))
    }

    async fn list_records(&self) -> Result<Vec<NotificationRecord>, Error> {
        Ok(self.records().await?.into_values().collect())
    }

    async fn clear(&self, key_index: usize) -> Result<bool, Error> {
        self.mutate(move |records| records.remove(&key_index).is_some())
            .await
    }

    async fn clear_all(&self) -> Result<(), Error> {
        self.mutate(|records| {
            let changed = !records.is_empty();
            records.clear();
            changed
        })
        .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // mutations are on disk before they return
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_ledger_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = FileNotificationLedger::open(&path).await.unwrap();
        assert!(ledger.list_records().await.unwrap().is_empty());
        assert!(!path.exists(), "Opening must not create the file");

        ledger.mark_notified(5).await.unwrap();
        assert!(ledger.has_notified(5).await.unwrap());
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["notifications"][0]["key_index"], 5);
        assert!(value["notifications"][0]["notified_at"].is_string());
    }

    #[tokio::test]
    async fn test_file_ledger_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let first_record = {
            let ledger = FileNotificationLedger::open(&path).await.unwrap();
            ledger.mark_notified(8).await.unwrap();
            ledger.get_record(8).await.unwrap().unwrap()
        };

        let reopened = FileNotificationLedger::open(&path).await.unwrap();
        assert!(reopened.has_notified(8).await.unwrap());
        assert_eq!(reopened.get_record(8).await.unwrap(), Some(first_record.clone()));

        // re-marking keeps the original timestamp
        reopened.mark_notified(8).await.unwrap();
        let again = FileNotificationLedger::open(&path).await.unwrap();
        assert_eq!(again.get_record(8).await.unwrap(), Some(first_record));
    }

    #[tokio::test]
    async fn test_file_ledger_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = FileNotificationLedger::open(&path).await.unwrap();
        ledger.mark_notified(5).await.unwrap();
        // second write creates the backup holding {5}
        ledger.mark_notified(8).await.unwrap();

        let backup = backup_path(&path);
        assert!(backup.exists(), "Backup file should exist after second write");

        fs::write(&path, b"corrupted json data").unwrap();

        let recovered = FileNotificationLedger::open(&path)
            .await
            .expect("corrupted ledger should recover from backup");
        assert!(recovered.has_notified(5).await.unwrap());
        assert!(
            !recovered.has_notified(8).await.unwrap(),
            "Backup holds the state before the last write"
        );
    }

    #[tokio::test]
    async fn test_file_ledger_corruption_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{ nope").unwrap();

        let ledger = FileNotificationLedger::open(&path).await.unwrap();
        assert!(ledger.list_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_ledger_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        let ledger = FileNotificationLedger::open(&path).await.unwrap();
        ledger.mark_notified(5).await.unwrap();
        ledger.mark_notified(10).await.unwrap();

        assert!(ledger.clear(5).await.unwrap());
        assert!(!ledger.clear(5).await.unwrap());

        let reopened = FileNotificationLedger::open(&path).await.unwrap();
        assert!(!reopened.has_notified(5).await.unwrap());
        assert!(reopened.has_notified(10).await.unwrap());

        reopened.clear_all().await.unwrap();
        let emptied = FileNotificationLedger::open(&path).await.unwrap();
        assert!(emptied.list_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_marks_for_different_indices() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = FileNotificationLedger::open(&path).await.unwrap();

        let mut handles = Vec::new();
        for index in 1..=20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.mark_notified(index).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = FileNotificationLedger::open(&path).await.unwrap();
        assert_eq!(reopened.list_records().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_concurrent_marks_for_same_index_keep_one_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = FileNotificationLedger::open(&path).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.mark_notified(8).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let records = FileNotificationLedger::open(&path)
            .await
            .unwrap()
            .list_records()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records, ledger.list_records().await.unwrap());
    }

    #[tokio::test]
    async fn test_separate_instances_share_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let first = FileNotificationLedger::open(&path).await.unwrap();
        let second = FileNotificationLedger::open(&path).await.unwrap();

        first.mark_notified(5).await.unwrap();
        assert!(
            second.has_notified(5).await.unwrap(),
            "A mark from another instance must be visible"
        );

        second.mark_notified(8).await.unwrap();
        let indices: Vec<usize> = FileNotificationLedger::open(&path)
            .await
            .unwrap()
            .list_records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.key_index)
            .collect();
        assert_eq!(indices, vec![5, 8]);

        // the second instance must not reset the first one's timestamp
        let record = first.get_record(5).await.unwrap().unwrap();
        second.mark_notified(5).await.unwrap();
        assert_eq!(first.get_record(5).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_clear_from_another_instance_keeps_other_marks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let dispatcher = FileNotificationLedger::open(&path).await.unwrap();
        let maintenance = FileNotificationLedger::open(&path).await.unwrap();

        dispatcher.mark_notified(5).await.unwrap();
        dispatcher.mark_notified(10).await.unwrap();
        assert!(maintenance.clear(5).await.unwrap());
        dispatcher.mark_notified(8).await.unwrap();

        let indices: Vec<usize> = dispatcher
            .list_records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.key_index)
            .collect();
        assert_eq!(indices, vec![8, 10]);
    }

    #[tokio::test]
    async fn test_concurrent_marks_from_separate_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut handles = Vec::new();
        for index in 1..=12 {
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let ledger = FileNotificationLedger::open(&path).await?;
                ledger.mark_notified(index).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = FileNotificationLedger::open(&path).await.unwrap();
        assert_eq!(reopened.list_records().await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_cancelled_marks_never_leave_a_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = FileNotificationLedger::open(&path).await.unwrap();

        for index in 1..=10 {
            // dropped after its first poll, while the write is in flight
            let _ = tokio::time::timeout(
                std::time::Duration::ZERO,
                ledger.mark_notified(index),
            )
            .await;

            if path.exists() {
                let content = fs::read_to_string(&path).unwrap();
                let file: LedgerFileFormat = serde_json::from_str(&content)
                    .expect("ledger file is either the old or the new document");
                let mut seen: Vec<usize> =
                    file.notifications.iter().map(|r| r.key_index).collect();
                seen.dedup();
                assert_eq!(seen.len(), file.notifications.len());
            }
        }

        // finishing every mark yields exactly one record per index
        for index in 1..=10 {
            ledger.mark_notified(index).await.unwrap();
        }
        let records = ledger.list_records().await.unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(
            records,
            FileNotificationLedger::open(&path)
                .await
                .unwrap()
                .list_records()
                .await
                .unwrap()
        );
    }
}
