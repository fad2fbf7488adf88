use super::{KeyValueStore, StorageError};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const ENTRY_EXTENSION: &str = "json";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
}

/// Directory-backed store: one small JSON file per key.
///
/// Several reader processes may share one directory. Each process remembers
/// what it wrote last per key so [`super::StorageWatcher`] can tell its own
/// writes from writes made elsewhere.
pub struct FileStore {
    dir: PathBuf,
    // key -> last value written (None = removed) by this process
    local_writes: Mutex<HashMap<String, Option<String>>>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create storage directory {dir:?}"))?;
        }
        debug!("Opened file store at {dir:?}");
        Ok(Self {
            dir,
            local_writes: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        self.dir.join(format!("{digest:x}.{ENTRY_EXTENSION}"))
    }

    fn read_entry(path: &Path) -> Option<StoredEntry> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<StoredEntry>(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable storage entry {path:?}: {e}");
                None
            }
        }
    }

    fn remember_write(&self, key: &str, value: Option<&str>) {
        if let Ok(mut writes) = self.local_writes.lock() {
            writes.insert(key.to_string(), value.map(str::to_string));
        }
    }

    /// Whether `value` is exactly what this process last wrote for `key`.
    pub(crate) fn written_here(&self, key: &str, value: Option<&str>) -> bool {
        self.local_writes
            .lock()
            .map(|writes| {
                writes
                    .get(key)
                    .is_some_and(|last| last.as_deref() == value)
            })
            .unwrap_or(false)
    }

    /// Drops the record of our last write to `key` once another process has
    /// overwritten it, so a later foreign write of the same value still counts.
    pub(crate) fn forget_write(&self, key: &str) {
        if let Ok(mut writes) = self.local_writes.lock() {
            writes.remove(key);
        }
    }

    /// Every readable entry currently on disk.
    pub fn snapshot(&self) -> HashMap<String, String> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return HashMap::new();
        };

        read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
            .filter_map(|path| Self::read_entry(&path))
            .map(|entry| (entry.key, entry.value))
            .collect()
    }
}

fn map_io_error(key: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::StorageFull => StorageError::QuotaExceeded(key.to_string()),
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
            StorageError::Unavailable(e.to_string())
        }
        _ => StorageError::Io(e),
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = Self::read_entry(&self.entry_path(key))?;
        // md5 collisions are not a practical concern, but never hand back another key's value
        (entry.key == key).then_some(entry.value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("tmp");
        let content = serde_json::to_string(&StoredEntry {
            key: key.to_string(),
            value: value.to_string(),
        })?;

        fs::write(&tmp_path, content).map_err(|e| map_io_error(key, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| map_io_error(key, e))?;
        self.remember_write(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(map_io_error(key, e)),
        }
        self.remember_write(key, None);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.snapshot().into_keys().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(temp_dir.path()).unwrap();
            store.set("sarpay-progress-b1", "{\"location\":\"ch1\"}").unwrap();
        }

        let reopened = FileStore::open(temp_dir.path()).unwrap();
        assert_eq!(
            reopened.get("sarpay-progress-b1").as_deref(),
            Some("{\"location\":\"ch1\"}")
        );
        assert_eq!(reopened.keys(), vec!["sarpay-progress-b1".to_string()]);
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("nested")).unwrap();

        store.remove("nothing-here").unwrap();
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k"), None);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_tracks_own_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        store.set("k", "1").unwrap();
        assert!(store.written_here("k", Some("1")));
        assert!(!store.written_here("k", Some("2")));

        store.remove("k").unwrap();
        assert!(store.written_here("k", None));
        assert!(!store.written_here("other", None));
    }

    #[test]
    fn test_corrupt_entry_reads_as_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        store.set("k", "v").unwrap();

        fs::write(store.entry_path("k"), "not json at all").unwrap();
        assert_eq!(store.get("k"), None);
        assert!(store.snapshot().is_empty());
    }
}
