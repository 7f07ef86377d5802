//! A list in the state tree mirrored into one storage bucket.

use loom_plugin_host::PluginError;
use loom_state::{StateStore, StateSubscription};
use loom_storage::StorageManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub(crate) struct PersistedSlice {
    store: StateStore,
    storage: StorageManager,
    path: &'static str,
    key: &'static str,
    subscription: Mutex<Option<StateSubscription>>,
}

impl PersistedSlice {
    pub(crate) fn new(store: StateStore, storage: StorageManager, path: &'static str, key: &'static str) -> Self {
        Self {
            store,
            storage,
            path,
            key,
            subscription: Mutex::new(None),
        }
    }

    /// Copies the stored bucket into the tree. A missing bucket, or one that
    /// is not a list, loads as an empty list.
    pub(crate) fn load(&self) {
        let items = match self.storage.get(self.key) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                warn!(key = self.key, "Stored bucket is not a list, starting empty");
                Vec::new()
            }
            None => Vec::new(),
        };
        debug!(path = self.path, count = items.len(), "Loaded persisted list");
        self.store.set(self.path, Value::Array(items));
    }

    /// Writes the current list to storage on every change to its path
    /// until [`detach`](Self::detach) is called.
    pub(crate) fn attach(&self) {
        let storage = self.storage.clone();
        let key = self.key;
        let subscription = self.store.subscribe(self.path, move |change| {
            if !storage.set(key, change.new_value) {
                warn!(key, "Failed to persist list");
            }
            Ok(())
        });
        if let Some(previous) = lock(&self.subscription).replace(subscription) {
            previous.unsubscribe();
        }
    }

    pub(crate) fn detach(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            subscription.unsubscribe();
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    pub(crate) fn items<T: DeserializeOwned>(&self) -> Result<Vec<T>, PluginError> {
        match self.store.get(self.path) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    pub(crate) fn replace<T: Serialize>(&self, items: &[T]) -> Result<(), PluginError> {
        self.store.set(self.path, serde_json::to_value(items)?);
        Ok(())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
