use super::broadcast::{ChangeBus, ChangeOrigin, KeyChange, Subscription};
use super::{KeyValueStore, decode_json, read_json, remove_logged};
use log::error;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// One durable key bound to an in-memory value.
///
/// Every cell bound to the same key stays in step: writes are published on the
/// [`ChangeBus`] and applied by siblings on their next [`PersistentCell::poll_changes`].
/// Changes made by other processes arrive on the same bus through a
/// [`super::StorageWatcher`]. Storage failures never reach the caller.
pub struct PersistentCell<T> {
    key: String,
    default: T,
    value: T,
    store: Arc<dyn KeyValueStore>,
    bus: ChangeBus,
    subscription: Subscription,
}

impl<T> PersistentCell<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq,
{
    pub fn new(
        key: impl Into<String>,
        default: T,
        store: Arc<dyn KeyValueStore>,
        bus: ChangeBus,
    ) -> Self {
        let key = key.into();
        let value = read_json(store.as_ref(), &key).unwrap_or_else(|| default.clone());
        let subscription = bus.subscribe();
        Self {
            key,
            default,
            value,
            store,
            bus,
            subscription,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;

        let encoded = match serde_json::to_string(&self.value) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode value for '{}': {e}", self.key);
                return;
            }
        };

        if let Err(e) = self.store.set(&self.key, &encoded) {
            error!("Failed to persist '{}': {e}", self.key);
        }

        self.bus
            .publish(KeyChange::same_process(self.key.clone(), Some(encoded)));
    }

    /// Functional form of [`PersistentCell::set`].
    pub fn update(&mut self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.value);
        self.set(next);
    }

    /// Resets to the default and deletes the durable entry.
    pub fn remove(&mut self) {
        self.value = self.default.clone();
        remove_logged(self.store.as_ref(), &self.key);
        self.bus
            .publish(KeyChange::same_process(self.key.clone(), None));
    }

    /// Applies pending notifications. Returns `true` when the value changed.
    pub fn poll_changes(&mut self) -> bool {
        let mut changed = false;
        for change in self.subscription.drain() {
            changed |= self.apply_change(&change);
        }
        changed
    }

    /// Reacts to a single notification. Returns `true` when the value changed.
    pub fn apply_change(&mut self, change: &KeyChange) -> bool {
        if change.key != self.key {
            return false;
        }

        let next = match (&change.value, change.origin) {
            (Some(raw), _) => match decode_json::<T>(&self.key, raw) {
                Some(value) => value,
                None => return false,
            },
            (None, ChangeOrigin::SameProcess) => self.default.clone(),
            // a clear in another process leaves this view alone
            (None, ChangeOrigin::CrossContext) => return false,
        };

        if next == self.value {
            return false;
        }
        self.value = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn cell(store: &Arc<MemoryStore>, bus: &ChangeBus) -> PersistentCell<u32> {
        PersistentCell::new("counter", 7, store.clone(), bus.clone())
    }

    #[test]
    fn test_missing_key_uses_default() {
        let store = Arc::new(MemoryStore::new());
        let cell = cell(&store, &ChangeBus::new());
        assert_eq!(*cell.get(), 7);
    }

    #[test]
    fn test_malformed_value_uses_default() {
        let store = Arc::new(MemoryStore::new());
        store.set("counter", "{not json").unwrap();
        let cell = cell(&store, &ChangeBus::new());
        assert_eq!(*cell.get(), 7);
    }

    #[test]
    fn test_update_uses_previous_value() {
        let store = Arc::new(MemoryStore::new());
        let mut cell = cell(&store, &ChangeBus::new());

        cell.update(|prev| prev + 1);
        cell.update(|prev| prev * 2);

        assert_eq!(*cell.get(), 16);
        assert_eq!(store.get("counter").as_deref(), Some("16"));
    }

    #[test]
    fn test_remove_resets_siblings() {
        let store = Arc::new(MemoryStore::new());
        let bus = ChangeBus::new();
        let mut writer = cell(&store, &bus);
        let mut reader = cell(&store, &bus);

        writer.set(42);
        assert!(reader.poll_changes());
        assert_eq!(*reader.get(), 42);

        writer.remove();
        assert!(reader.poll_changes());
        assert_eq!(*reader.get(), 7);
        assert_eq!(store.get("counter"), None);
    }

    #[test]
    fn test_cross_context_clear_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mut cell = cell(&store, &ChangeBus::new());
        cell.set(3);

        assert!(!cell.apply_change(&KeyChange::cross_context("counter", None)));
        assert_eq!(*cell.get(), 3);
    }

    #[test]
    fn test_malformed_notification_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mut cell = cell(&store, &ChangeBus::new());

        let change = KeyChange::cross_context("counter", Some("oops".to_string()));
        assert!(!cell.apply_change(&change));
        assert_eq!(*cell.get(), 7);
    }
}
