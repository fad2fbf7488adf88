use super::FileStore;
use crate::clock::OneShotTimer;
use log::debug;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Published by a cell in this process.
    SameProcess,
    /// Observed in durable storage, written by another process.
    CrossContext,
}

/// "Key changed" notification. `value` is `None` when the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    pub key: String,
    pub value: Option<String>,
    pub origin: ChangeOrigin,
}

impl KeyChange {
    pub fn same_process(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
            origin: ChangeOrigin::SameProcess,
        }
    }

    pub fn cross_context(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
            origin: ChangeOrigin::CrossContext,
        }
    }
}

/// Publish/subscribe channel scoped to this process. Cloning shares the bus.
#[derive(Clone, Default)]
pub struct ChangeBus {
    subscribers: Arc<Mutex<Vec<Sender<KeyChange>>>>,
}

pub struct Subscription {
    rx: Receiver<KeyChange>,
}

impl Subscription {
    /// Everything published since the last drain, oldest first.
    pub fn drain(&self) -> Vec<KeyChange> {
        self.rx.try_iter().collect()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Delivers `change` to every live subscriber, pruning dropped ones.
    pub fn publish(&self, change: KeyChange) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Feeds changes made by other processes sharing a [`FileStore`] directory
/// into a [`ChangeBus`] as [`ChangeOrigin::CrossContext`] notifications.
pub struct StorageWatcher {
    store: Arc<FileStore>,
    bus: ChangeBus,
    snapshot: HashMap<String, String>,
    interval: Duration,
    next_poll: OneShotTimer,
}

impl StorageWatcher {
    pub fn new(store: Arc<FileStore>, bus: ChangeBus) -> Self {
        let snapshot = store.snapshot();
        Self {
            store,
            bus,
            snapshot,
            interval: DEFAULT_WATCH_INTERVAL,
            next_poll: OneShotTimer::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Polls at most once per interval. Returns the number of published changes.
    pub fn poll_if_due(&mut self, now: Instant) -> usize {
        if self.next_poll.is_pending() && !self.next_poll.fire_if_due(now) {
            return 0;
        }
        self.next_poll.schedule(now, self.interval);
        self.poll()
    }

    /// Diffs the directory against the last snapshot and publishes foreign changes.
    pub fn poll(&mut self) -> usize {
        let current = self.store.snapshot();
        let mut changes = Vec::new();

        for (key, value) in &current {
            if self.snapshot.get(key) != Some(value)
                && !self.store.written_here(key, Some(value))
            {
                self.store.forget_write(key);
                changes.push(KeyChange::cross_context(key.clone(), Some(value.clone())));
            }
        }

        for key in self.snapshot.keys() {
            if !current.contains_key(key) && !self.store.written_here(key, None) {
                self.store.forget_write(key);
                changes.push(KeyChange::cross_context(key.clone(), None));
            }
        }

        self.snapshot = current;

        let count = changes.len();
        for change in changes {
            debug!("Storage changed elsewhere: {}", change.key);
            self.bus.publish(change);
        }
        count
    }
}
