//! Deterministic stand-ins for time, storage, the remote backend and the
//! fullscreen host. Only built for tests and the `test-utils` feature.

use crate::clock::Clock;
use crate::immersive::{FullscreenError, FullscreenHost};
use crate::progress::{MemoryRemoteStore, ProgressKey, ProgressRecord, RemoteError, RemoteProgressStore};
use crate::storage::{KeyValueStore, MemoryStore, StorageError};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Clock that only moves when told to.
pub struct ManualClock {
    start: Instant,
    start_wall: DateTime<Utc>,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            start_wall: Utc
                .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += by;
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed =
            chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.start_wall + elapsed
    }
}

/// A remote upsert as observed by [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpsert {
    pub at_ms: u64,
    pub key: ProgressKey,
    pub record: ProgressRecord,
}

/// In-memory remote that records every upsert and fails on demand.
pub struct ScriptedRemote {
    inner: MemoryRemoteStore,
    clock: Arc<ManualClock>,
    upserts: Mutex<Vec<RecordedUpsert>>,
    fail_fetch: AtomicBool,
    fail_upsert: AtomicBool,
    fail_delete: AtomicBool,
}

impl ScriptedRemote {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryRemoteStore::new(),
            clock,
            upserts: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            fail_upsert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn with_record(mut self, key: ProgressKey, record: ProgressRecord) -> Self {
        self.inner = self.inner.with_record(key, record);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.fail_fetch.store(offline, Ordering::SeqCst);
        self.fail_upsert.store(offline, Ordering::SeqCst);
        self.fail_delete.store(offline, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> Vec<RecordedUpsert> {
        self.upserts.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn stored(&self, key: &ProgressKey) -> Option<ProgressRecord> {
        self.inner.get(key)
    }

    fn offline_error() -> RemoteError {
        RemoteError::Network("connection refused".to_string())
    }
}

impl RemoteProgressStore for ScriptedRemote {
    fn fetch(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, RemoteError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::offline_error());
        }
        self.inner.fetch(key)
    }

    fn upsert(
        &self,
        key: &ProgressKey,
        record: &ProgressRecord,
    ) -> Result<Option<ProgressRecord>, RemoteError> {
        if let Ok(mut upserts) = self.upserts.lock() {
            upserts.push(RecordedUpsert {
                at_ms: self.clock.elapsed_ms(),
                key: key.clone(),
                record: record.clone(),
            });
        }
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(Self::offline_error());
        }
        self.inner.upsert(key, record)
    }

    fn delete(&self, key: &ProgressKey) -> Result<(), RemoteError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::offline_error());
        }
        self.inner.delete(key)
    }
}

/// Memory store whose writes can be switched to fail like a full quota.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl KeyValueStore for FailingStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded(key.to_string()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage disabled".to_string()));
        }
        self.inner.remove(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}

/// Fullscreen host that flips a flag, or refuses every request.
#[derive(Debug, Default)]
pub struct FakeFullscreen {
    fullscreen: bool,
    deny: bool,
    pub requests: usize,
}

impl FakeFullscreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Simulates the user leaving fullscreen outside the app (e.g. Escape).
    pub fn exit_externally(&mut self) {
        self.fullscreen = false;
    }
}

impl FullscreenHost for FakeFullscreen {
    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn request_fullscreen(&mut self) -> Result<(), FullscreenError> {
        self.requests += 1;
        if self.deny {
            return Err(FullscreenError::Denied("permission denied".to_string()));
        }
        self.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<(), FullscreenError> {
        self.requests += 1;
        if self.deny {
            return Err(FullscreenError::Denied("permission denied".to_string()));
        }
        self.fullscreen = false;
        Ok(())
    }
}
