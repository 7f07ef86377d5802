//! The observable store.

use crate::defaults::default_tree;
use crate::error::{StateError, StateResult};
use crate::paths::GLOBAL;
use crate::tree::{deep_merge, is_changed, read_path, write_path};
use loom_types::Removal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error};

const WILDCARD_SUFFIX: &str = ".*";

/// A single change delivered to a state listener.
///
/// `path` is always the concrete path that was written, also for wildcard
/// and global listeners. `old_value` is `None` when nothing was stored there.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    pub path: &'a str,
    pub new_value: &'a Value,
    pub old_value: Option<&'a Value>,
}

pub type StateHandler = Arc<dyn Fn(&Change<'_>) -> anyhow::Result<()> + Send + Sync>;

struct Pending {
    path: String,
    new_value: Value,
    old_value: Option<Value>,
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Vec<Pending>,
}

pub(crate) struct Inner {
    tree: Mutex<Value>,
    listeners: Mutex<HashMap<String, Vec<(u64, StateHandler)>>>,
    batch: Mutex<BatchState>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove_listener(&self, path: &str, id: u64) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(list) = listeners.get_mut(path) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(path);
        }
        removed
    }
}

/// Handle returned by [`StateStore::subscribe`].
pub struct StateSubscription {
    store: Weak<Inner>,
    path: String,
    id: u64,
}

impl StateSubscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Removes the listener. Returns `false` if it was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.store.upgrade() {
            Some(inner) => inner.remove_listener(&self.path, self.id),
            None => false,
        }
    }
}

impl fmt::Debug for StateSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSubscription")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish()
    }
}

/// A derived value kept up to date by [`StateStore::computed`].
#[derive(Debug)]
pub struct Computed {
    target: String,
    subscriptions: Vec<StateSubscription>,
}

impl Computed {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stops recomputing. The last computed value stays in the tree.
    pub fn dispose(self) {
        for sub in self.subscriptions {
            sub.unsubscribe();
        }
    }
}

/// Shared, cloneable handle to the state tree.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a store holding [`default_tree`].
    pub fn new() -> Self {
        Self::with_tree(default_tree())
    }

    /// Creates a store holding an empty object.
    pub fn empty() -> Self {
        Self::with_tree(Value::Object(Map::new()))
    }

    pub fn with_tree(tree: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(tree),
                listeners: Mutex::new(HashMap::new()),
                batch: Mutex::new(BatchState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ================================================================
    // Reading
    // ================================================================

    pub fn get(&self, path: &str) -> Option<Value> {
        read_path(&lock(&self.inner.tree), path).cloned()
    }

    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// Reads and deserializes the value at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> StateResult<Option<T>> {
        match self.get(path) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Clone of the whole tree.
    pub fn snapshot(&self) -> Value {
        lock(&self.inner.tree).clone()
    }

    // ================================================================
    // Writing
    // ================================================================

    pub fn set(&self, path: &str, value: Value) {
        self.set_with(path, value, true);
    }

    /// Writes `value` at `path`. Listeners run only when `notify` is set and
    /// the value changed.
    pub fn set_with(&self, path: &str, value: Value, notify: bool) {
        let new_value = notify.then(|| value.clone());
        let old_value = write_path(&mut lock(&self.inner.tree), path, value);

        if let Some(new_value) = new_value
            && is_changed(old_value.as_ref(), &new_value)
        {
            self.notify(Pending {
                path: path.to_string(),
                new_value,
                old_value,
            });
        }
    }

    pub fn set_as<T: Serialize>(&self, path: &str, value: &T) -> StateResult<()> {
        self.set(path, serde_json::to_value(value)?);
        Ok(())
    }

    /// Shallow-merges the fields of `partial` onto the object at `path`.
    pub fn update(&self, path: &str, partial: Value) -> StateResult<()> {
        let Value::Object(fields) = partial else {
            return Err(StateError::NotAnObject(path.to_string()));
        };
        let mut current = match self.get(path) {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(StateError::NotAnObject(path.to_string())),
        };
        current.extend(fields);
        self.set(path, Value::Object(current));
        Ok(())
    }

    /// Appends (or prepends) `item` to the array at `path`, creating it when absent.
    pub fn push(&self, path: &str, item: Value, prepend: bool) -> StateResult<()> {
        let mut items = self.array_at(path)?;
        if prepend {
            items.insert(0, item);
        } else {
            items.push(item);
        }
        self.set(path, Value::Array(items));
        Ok(())
    }

    /// Filters items out of the array at `path` and returns how many were dropped.
    pub fn remove(&self, path: &str, removal: Removal<'_>) -> StateResult<usize> {
        let mut items = self.array_at(path)?;
        let before = items.len();
        items.retain(|item| !removal.matches(item));
        let removed = before - items.len();
        self.set(path, Value::Array(items));
        Ok(removed)
    }

    fn array_at(&self, path: &str) -> StateResult<Vec<Value>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(StateError::NotAnArray(path.to_string())),
        }
    }

    // ================================================================
    // Subscriptions
    // ================================================================

    /// Listens on an exact path, a `prefix.*` wildcard or the global `*`.
    pub fn subscribe<F>(&self, path: &str, f: F) -> StateSubscription
    where
        F: Fn(&Change<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(path, Arc::new(f))
    }

    pub fn subscribe_handler(&self, path: &str, handler: StateHandler) -> StateSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners)
            .entry(path.to_string())
            .or_default()
            .push((id, handler));

        StateSubscription {
            store: Arc::downgrade(&self.inner),
            path: path.to_string(),
            id,
        }
    }

    pub fn listener_count(&self, path: &str) -> usize {
        lock(&self.inner.listeners).get(path).map_or(0, Vec::len)
    }

    /// Runs `f` with notifications deferred until the outermost batch ends.
    ///
    /// Queued notifications are delivered in the order they happened, once
    /// each; they are delivered even if `f` panics.
    pub fn batch<F>(&self, f: F)
    where
        F: FnOnce(&StateStore),
    {
        lock(&self.inner.batch).depth += 1;
        let _flush = BatchGuard { store: self };
        f(self);
    }

    fn end_batch(&self) {
        let pending = {
            let mut batch = lock(&self.inner.batch);
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return;
            }
            std::mem::take(&mut batch.pending)
        };
        for change in pending {
            self.deliver(&change);
        }
    }

    fn notify(&self, change: Pending) {
        {
            let mut batch = lock(&self.inner.batch);
            if batch.depth > 0 {
                batch.pending.push(change);
                return;
            }
        }
        self.deliver(&change);
    }

    fn deliver(&self, change: &Pending) {
        let targets: Vec<(String, Vec<StateHandler>)> = {
            let listeners = lock(&self.inner.listeners);
            listener_keys(&change.path)
                .into_iter()
                .filter_map(|key| {
                    let handlers: Vec<StateHandler> =
                        listeners.get(&key)?.iter().map(|(_, h)| Arc::clone(h)).collect();
                    Some((key, handlers))
                })
                .collect()
        };

        let view = Change {
            path: &change.path,
            new_value: &change.new_value,
            old_value: change.old_value.as_ref(),
        };
        for (key, handlers) in &targets {
            for handler in handlers {
                if let Err(e) = guarded(|| handler(&view)) {
                    error!(path = %change.path, listener = %key, "Error in state listener: {e:#}");
                }
            }
        }
    }

    // ================================================================
    // Snapshots
    // ================================================================

    /// Copies the listed paths into a fresh tree, or the whole tree for `None`.
    /// Missing paths are skipped.
    pub fn export(&self, paths: Option<&[&str]>) -> Value {
        let Some(paths) = paths else {
            return self.snapshot();
        };
        let tree = lock(&self.inner.tree);
        let mut out = Value::Object(Map::new());
        for path in paths {
            if let Some(value) = read_path(&tree, path) {
                write_path(&mut out, path, value.clone());
            }
        }
        out
    }

    /// Replaces the tree, or deep-merges `state` into it, then notifies
    /// once on the global path.
    pub fn import(&self, state: Value, merge: bool) -> StateResult<()> {
        if !state.is_object() {
            return Err(StateError::NotAnObject(GLOBAL.to_string()));
        }
        let new_tree = {
            let mut tree = lock(&self.inner.tree);
            if merge {
                deep_merge(&mut tree, state);
            } else {
                *tree = state;
            }
            tree.clone()
        };
        debug!(merge, "State imported");

        self.notify(Pending {
            path: GLOBAL.to_string(),
            new_value: new_tree,
            old_value: Some(Value::Object(Map::new())),
        });
        Ok(())
    }

    /// Restores the default tree and drops every listener.
    pub fn reset(&self) {
        *lock(&self.inner.tree) = default_tree();
        lock(&self.inner.listeners).clear();
        debug!("State reset");
    }

    /// Writes `f(tree)` to `target` now and again whenever a path in `deps`
    /// notifies. The target is written without notifying.
    pub fn computed<F>(&self, f: F, deps: &[&str], target: &str) -> Computed
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let weak = Arc::downgrade(&self.inner);
        let target_path = target.to_string();

        let recompute = move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = StateStore { inner };
            match guarded(|| f(&store.snapshot())) {
                Ok(value) => store.set_with(&target_path, value, false),
                Err(e) => error!(target = %target_path, "Error in computed value: {e:#}"),
            }
        };
        recompute();

        let recompute = Arc::new(recompute);
        let subscriptions = deps
            .iter()
            .map(|dep| {
                let recompute = Arc::clone(&recompute);
                self.subscribe(dep, move |_| {
                    recompute();
                    Ok(())
                })
            })
            .collect();

        Computed {
            target: target.to_string(),
            subscriptions,
        }
    }
}

struct BatchGuard<'a> {
    store: &'a StateStore,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.store.end_batch();
    }
}

/// Listener keys notified for a change at `path`: the exact path, each
/// wildcard ancestor from the root down, then the global key.
fn listener_keys(path: &str) -> Vec<String> {
    let mut keys = vec![path.to_string()];
    let parts: Vec<&str> = path.split('.').collect();
    for i in 0..parts.len() {
        let wildcard = format!("{}{}", parts[..=i].join("."), WILDCARD_SUFFIX);
        if !keys.contains(&wildcard) {
            keys.push(wildcard);
        }
    }
    if !keys.iter().any(|k| k == GLOBAL) {
        keys.push(GLOBAL.to_string());
    }
    keys
}

fn guarded<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
