pub mod broadcast;
pub mod cell;
pub mod file;
pub mod memory;

pub use broadcast::{ChangeBus, ChangeOrigin, KeyChange, StorageWatcher, Subscription};
pub use cell::PersistentCell;
pub use file::FileStore;
pub use memory::MemoryStore;

use log::{debug, error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded while writing '{0}'")]
    QuotaExceeded(String),
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable string key-value store shared by every persistent value in the
/// process. Reads never fail; a missing or unreadable entry is `None`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Vec<String>;
}

/// Reads and decodes a JSON value. Corrupt entries are treated as a miss.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    decode_json(key, &raw)
}

pub(crate) fn decode_json<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Ignoring malformed value for '{key}': {e}");
            None
        }
    }
}

/// Encodes and writes a JSON value, returning the encoded text on success.
///
/// Failures are logged and swallowed: callers keep their in-memory state.
pub fn write_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Option<String> {
    let encoded = match serde_json::to_string(value) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("Failed to encode value for '{key}': {e}");
            return None;
        }
    };

    match store.set(key, &encoded) {
        Ok(()) => Some(encoded),
        Err(e) => {
            error!("Failed to persist '{key}': {e}");
            None
        }
    }
}

/// Removes a key, logging and swallowing failures.
pub fn remove_logged(store: &dyn KeyValueStore, key: &str) -> bool {
    match store.remove(key) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to remove '{key}': {e}");
            false
        }
    }
}
