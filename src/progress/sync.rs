use super::record::{ProgressKey, ProgressPatch, ProgressRecord};
use super::remote::{RemoteError, RemoteProgressStore};
use crate::clock::{Clock, OneShotTimer};
use crate::storage::{KeyValueStore, read_json, remove_logged, write_json};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Current reading progress for one (book, user) pair.
///
/// Local writes happen inside [`ProgressSync::update_progress`]; the remote
/// write is debounced and sent from [`ProgressSync::tick`], carrying only the
/// latest value. Remote failures are logged and never roll back local state.
pub struct ProgressSync {
    key: ProgressKey,
    progress: Option<ProgressRecord>,
    is_loading: bool,
    error: Option<RemoteError>,
    last_sync_error: Option<RemoteError>,
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteProgressStore>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    sync_timer: OneShotTimer,
    pending: Option<ProgressRecord>,
}

impl ProgressSync {
    pub fn new(
        key: ProgressKey,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteProgressStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key,
            progress: None,
            is_loading: true,
            error: None,
            last_sync_error: None,
            store,
            remote,
            clock,
            debounce: DEFAULT_SYNC_DEBOUNCE,
            sync_timer: OneShotTimer::new(),
            pending: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn key(&self) -> &ProgressKey {
        &self.key
    }

    pub fn progress(&self) -> Option<&ProgressRecord> {
        self.progress.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Advisory error from the last load. Reading continues regardless.
    pub fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    pub fn last_sync_error(&self) -> Option<&RemoteError> {
        self.last_sync_error.as_ref()
    }

    pub fn has_pending_sync(&self) -> bool {
        self.sync_timer.is_pending()
    }

    /// Resolves the starting record: remote when it has one, else local cache.
    pub fn load(&mut self) {
        self.is_loading = true;
        self.error = None;
        let cache_key = self.key.cache_key();

        self.progress = match self.remote.fetch(&self.key) {
            Ok(Some(record)) => {
                debug!("Hydrated progress for {} from remote", self.key);
                write_json(self.store.as_ref(), &cache_key, &record);
                Some(record)
            }
            Ok(None) => {
                debug!("No remote progress for {}, using local cache", self.key);
                read_json(self.store.as_ref(), &cache_key)
            }
            Err(e) => {
                warn!("Failed to fetch progress for {}: {e}; using local cache", self.key);
                self.error = Some(e);
                read_json(self.store.as_ref(), &cache_key)
            }
        };

        self.is_loading = false;
    }

    /// Re-targets this synchronizer at another book or user and reloads.
    ///
    /// A remote write still pending for the previous key is dropped.
    pub fn switch_key(&mut self, key: ProgressKey) {
        if key == self.key {
            return;
        }
        self.teardown();
        self.key = key;
        self.progress = None;
        self.last_sync_error = None;
        self.load();
    }

    pub fn update_progress(&mut self, patch: ProgressPatch) {
        let merged = ProgressRecord::merge(self.progress.as_ref(), &patch, self.clock.wall_now());

        self.progress = Some(merged.clone());
        write_json(self.store.as_ref(), &self.key.cache_key(), &merged);

        self.sync_timer.cancel();
        self.sync_timer.schedule(self.clock.now(), self.debounce);
        self.pending = Some(merged);
    }

    pub fn clear_progress(&mut self) {
        self.progress = None;
        remove_logged(self.store.as_ref(), &self.key.cache_key());
        self.teardown();

        match self.remote.delete(&self.key) {
            Ok(()) => info!("Cleared progress for {}", self.key),
            Err(e) => warn!("Failed to delete remote progress for {}: {e}", self.key),
        }
    }

    /// Sends the debounced remote write once its delay has elapsed.
    /// Returns `true` when a write was attempted.
    pub fn tick(&mut self) -> bool {
        if !self.sync_timer.fire_if_due(self.clock.now()) {
            return false;
        }
        let Some(record) = self.pending.take() else {
            return false;
        };

        match self.remote.upsert(&self.key, &record) {
            Ok(_) => {
                debug!("Synced progress for {} ({:.1}%)", self.key, record.percentage);
                self.last_sync_error = None;
            }
            Err(e) => {
                warn!("Failed to sync progress for {}: {e}", self.key);
                self.last_sync_error = Some(e);
            }
        }
        true
    }

    /// Cancels the pending remote write. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.sync_timer.cancel();
        self.pending = None;
    }
}

impl Drop for ProgressSync {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Every locally cached record, most recently read first.
pub fn recent_progress(store: &dyn KeyValueStore) -> Vec<(ProgressKey, ProgressRecord)> {
    let mut entries: Vec<(ProgressKey, ProgressRecord)> = store
        .keys()
        .into_iter()
        .filter_map(|cache_key| {
            let key = ProgressKey::from_cache_key(&cache_key)?;
            let record = read_json::<ProgressRecord>(store, &cache_key)?;
            Some((key, record))
        })
        .collect();

    entries.sort_by(|a, b| b.1.last_read.cmp(&a.1.last_read));
    entries
}
