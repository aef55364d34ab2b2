//! Crash-safe persistence of validated proxies
//!
//! The canonical output is a single JSON document that is only ever replaced
//! wholesale: every mutation loads the current document, changes it in memory,
//! writes the result to a fresh temporary file next to the target and renames
//! it over the target. Readers therefore see either the old or the new
//! document, never a partial one.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Durable form of the accumulated valid results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedResultSet {
    /// `protocol://address:port` entries in append order
    pub proxies: Vec<String>,
    /// Always `proxies.len()`
    pub count: usize,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

impl PersistedResultSet {
    pub fn empty() -> Self {
        Self {
            proxies: Vec::new(),
            count: 0,
            last_updated: Utc::now(),
            last_check: None,
        }
    }
}

impl Default for PersistedResultSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Atomic, serialized access to the persisted result set.
///
/// Cloning is cheap; clones share the same write lock.
#[derive(Debug, Clone)]
pub struct ResultStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    path: PathBuf,
    /// Held for the whole load -> mutate -> write -> rename sequence
    write_lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Replace the persisted set with an empty one stamped now
    pub async fn reinitialize(&self) -> Result<(), StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.commit(&PersistedResultSet::empty()).await
    }

    /// Append one valid entry, returning the new count
    pub async fn append_valid(&self, entry: &str) -> Result<usize, StoreError> {
        let set = self
            .transact(|set| {
                set.proxies.push(entry.to_string());
                set.last_updated = Utc::now();
            })
            .await?;
        Ok(set.count)
    }

    /// Record when the current validation cycle started
    pub async fn mark_checked(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.transact(|set| set.last_check = Some(at)).await?;
        Ok(())
    }

    /// Read the last committed set without taking the write lock
    pub async fn snapshot(&self) -> Result<PersistedResultSet, StoreError> {
        let bytes = fs::read(self.path()).await.map_err(|source| StoreError::Io {
            path: self.path().to_path_buf(),
            source,
        })?;
        self.decode(&bytes)
    }

    /// The only read-modify-write path: lock, load, mutate, commit.
    async fn transact<F>(&self, mutate: F) -> Result<PersistedResultSet, StoreError>
    where
        F: FnOnce(&mut PersistedResultSet),
    {
        let _guard = self.inner.write_lock.lock().await;

        let mut set = self.load().await?;
        mutate(&mut set);
        set.count = set.proxies.len();

        self.commit(&set).await?;
        Ok(set)
    }

    /// Load the current set; a missing file starts over from empty
    async fn load(&self) -> Result<PersistedResultSet, StoreError> {
        match fs::read(self.path()).await {
            Ok(bytes) => self.decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PersistedResultSet::empty()),
            Err(source) => Err(StoreError::Io {
                path: self.path().to_path_buf(),
                source,
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<PersistedResultSet, StoreError> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
            path: self.path().to_path_buf(),
            source,
        })
    }

    /// Write `set` to a temporary sibling and rename it over the target.
    ///
    /// Callers must hold the write lock.
    async fn commit(&self, set: &PersistedResultSet) -> Result<(), StoreError> {
        let data = serde_json::to_vec(set)?;
        let temp_path = self.temp_path();

        let mut file = fs::File::create(&temp_path).await.map_err(|source| {
            if matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) {
                StoreError::Unavailable {
                    path: self.path().to_path_buf(),
                    source,
                }
            } else {
                StoreError::Io {
                    path: temp_path.clone(),
                    source,
                }
            }
        })?;

        let written = async {
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, self.path()).await
        }
        .await;

        if let Err(source) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: self.path().to_path_buf(),
                source,
            });
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("results");
        self.path()
            .with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }
}

/// Append-only plaintext logs for the current run
#[derive(Debug, Clone)]
pub struct RunLogs {
    inner: Arc<LogsInner>,
}

#[derive(Debug)]
struct LogsInner {
    valid_path: PathBuf,
    invalid_path: PathBuf,
    lock: Mutex<()>,
}

impl RunLogs {
    pub fn new(valid_path: impl Into<PathBuf>, invalid_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(LogsInner {
                valid_path: valid_path.into(),
                invalid_path: invalid_path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn valid_path(&self) -> &Path {
        &self.inner.valid_path
    }

    pub fn invalid_path(&self) -> &Path {
        &self.inner.invalid_path
    }

    /// Empty the valid log, and the invalid log too when it is in use
    pub async fn truncate(&self, include_invalid: bool) -> io::Result<()> {
        let _guard = self.inner.lock.lock().await;
        fs::write(&self.inner.valid_path, b"").await?;
        if include_invalid {
            fs::write(&self.inner.invalid_path, b"").await?;
        }
        Ok(())
    }

    pub async fn append_valid(&self, entry: &str) -> io::Result<()> {
        self.append_line(&self.inner.valid_path, entry).await
    }

    pub async fn append_invalid(&self, candidate: &str) -> io::Result<()> {
        self.append_line(&self.inner.invalid_path, candidate).await
    }

    async fn append_line(&self, path: &Path, line: &str) -> io::Result<()> {
        let _guard = self.inner.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ResultStore {
        ResultStore::new(dir.path().join("proxies.json"))
    }

    #[tokio::test]
    async fn test_reinitialize_then_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.append_valid("http://1.1.1.1:80").await.unwrap();
        store.reinitialize().await.unwrap();

        let set = store.snapshot().await.unwrap();
        assert_eq!(set.count, 0);
        assert!(set.proxies.is_empty());
        assert!(set.last_check.is_none());
    }

    #[tokio::test]
    async fn test_append_keeps_order_and_count() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reinitialize().await.unwrap();

        assert_eq!(store.append_valid("http://1.1.1.1:80").await.unwrap(), 1);
        assert_eq!(store.append_valid("socks5://2.2.2.2:1080").await.unwrap(), 2);

        let set = store.snapshot().await.unwrap();
        assert_eq!(set.proxies, vec!["http://1.1.1.1:80", "socks5://2.2.2.2:1080"]);
        assert_eq!(set.count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reinitialize().await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let set = store.snapshot().await.expect("reader saw a partial file");
                    assert_eq!(set.count, set.proxies.len());
                    tokio::task::yield_now().await;
                }
            })
        };

        let writers: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_valid(&format!("http://10.0.0.{}:8080", i))
                        .await
                        .unwrap();
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap();
        }
        reader.await.unwrap();

        let set = store.snapshot().await.unwrap();
        assert_eq!(set.count, 64);
        assert_eq!(set.proxies.len(), 64);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reinitialize().await.unwrap();
        store.append_valid("http://1.1.1.1:80").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("proxies.json")]);
    }

    #[tokio::test]
    async fn test_mark_checked_keeps_proxies() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reinitialize().await.unwrap();
        store.append_valid("https://3.3.3.3:443").await.unwrap();

        let at = Utc::now();
        store.mark_checked(at).await.unwrap();

        let set = store.snapshot().await.unwrap();
        assert_eq!(set.last_check, Some(at));
        assert_eq!(set.count, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_recreated_on_append() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.append_valid("http://1.1.1.1:80").await.unwrap(), 1);
        assert_eq!(store.snapshot().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), b"{\"proxies\": [").unwrap();

        let err = store.append_valid("http://1.1.1.1:80").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path().join("gone").join("proxies.json"));

        let err = store.reinitialize().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_persisted_field_names() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reinitialize().await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["count"], 0);
        assert!(raw["proxies"].as_array().unwrap().is_empty());
        assert!(raw["lastUpdated"].is_string());
        assert!(raw["lastCheck"].is_null());
    }

    #[tokio::test]
    async fn test_run_logs_append_and_truncate() {
        let dir = TempDir::new().unwrap();
        let logs = RunLogs::new(dir.path().join("valid.txt"), dir.path().join("invalid.txt"));

        logs.append_valid("http://1.1.1.1:80").await.unwrap();
        logs.append_valid("socks4://2.2.2.2:1080").await.unwrap();
        logs.append_invalid("3.3.3.3:8080").await.unwrap();

        let valid = std::fs::read_to_string(logs.valid_path()).unwrap();
        assert_eq!(valid, "http://1.1.1.1:80\nsocks4://2.2.2.2:1080\n");

        logs.truncate(false).await.unwrap();
        assert_eq!(std::fs::read_to_string(logs.valid_path()).unwrap(), "");
        assert_eq!(
            std::fs::read_to_string(logs.invalid_path()).unwrap(),
            "3.3.3.3:8080\n"
        );

        logs.truncate(true).await.unwrap();
        assert_eq!(std::fs::read_to_string(logs.invalid_path()).unwrap(), "");
    }
}
