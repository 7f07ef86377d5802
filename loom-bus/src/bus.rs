//! The event bus itself.

use crate::error::{BusError, BusResult};
use crate::listener::{Emission, Handler, Listener, ListenerOptions, Subscription};
use crate::namespace::Namespaced;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

/// Listener count per event above which `on` logs a warning.
pub const DEFAULT_MAX_LISTENERS: usize = 100;

const WILDCARD_SUFFIX: &str = ".*";
const GLOBAL_EVENT: &str = "*";

/// Mutable view of an emission handed to middleware.
#[derive(Debug)]
pub struct EmitContext {
    event: String,
    /// Arguments that will be delivered to listeners.
    pub args: Vec<Value>,
    /// Set to `true` to drop the emission entirely.
    pub prevent_default: bool,
}

impl EmitContext {
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Middleware runs before dispatch and may rewrite args or cancel delivery.
pub type Middleware = Arc<dyn Fn(&mut EmitContext) -> anyhow::Result<()> + Send + Sync>;

/// Which events [`EventBus::pipe`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeSelector {
    All,
    Events(Vec<String>),
}

pub(crate) struct Inner {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    middleware: Mutex<Vec<Middleware>>,
    next_id: AtomicU64,
    max_listeners: AtomicUsize,
    debug: AtomicBool,
}

impl Inner {
    pub(crate) fn remove_listener(&self, event: &str, id: u64) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(HashMap::new()),
                middleware: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                max_listeners: AtomicUsize::new(DEFAULT_MAX_LISTENERS),
                debug: AtomicBool::new(false),
            }),
        }
    }

    // ================================================================
    // Subscribing
    // ================================================================

    /// Registers a listener for `event`.
    pub fn on<F>(&self, event: &str, f: F, options: ListenerOptions) -> Subscription
    where
        F: Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_handler(event, Arc::new(f), options)
    }

    /// Registers a shared handler. Keep a clone of the `Arc` to remove it
    /// later with [`EventBus::off`].
    pub fn on_handler(&self, event: &str, handler: Handler, options: ListenerOptions) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let max = self.inner.max_listeners.load(Ordering::Relaxed);

        {
            let mut listeners = lock(&self.inner.listeners);
            let list = listeners.entry(event.to_string()).or_default();
            if list.len() >= max {
                warn!(event, max_listeners = max, "Max listeners exceeded for event");
            }
            list.push(Listener {
                id,
                handler,
                once: options.once,
                priority: options.priority,
            });
        }

        if self.is_debug() {
            trace!(event, id, "Event listener added");
        }

        Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Registers a listener that is removed after its first delivery.
    pub fn once<F>(&self, event: &str, f: F) -> Subscription
    where
        F: Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(event, f, ListenerOptions::once())
    }

    /// Removes the first listener on `event` registered with this exact handler.
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let Some(pos) = list.iter().position(|l| Arc::ptr_eq(&l.handler, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            listeners.remove(event);
        }
        drop(listeners);

        if self.is_debug() {
            trace!(event, "Event listener removed");
        }
        true
    }

    /// Removes every listener on `event`, or on all events when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = lock(&self.inner.listeners);
        match event {
            Some(name) => {
                listeners.remove(name);
            }
            None => listeners.clear(),
        }
        drop(listeners);

        if self.is_debug() {
            trace!(event = event.unwrap_or("all events"), "All listeners removed");
        }
    }

    // ================================================================
    // Emitting
    // ================================================================

    /// Delivers `args` to every matching listener and returns whether any
    /// listener was found.
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        let middleware: Vec<Middleware> = lock(&self.inner.middleware).clone();
        if middleware.is_empty() {
            return self.dispatch(event, args);
        }

        let mut ctx = EmitContext {
            event: event.to_string(),
            args: args.to_vec(),
            prevent_default: false,
        };
        for mw in middleware.iter().rev() {
            if let Err(e) = guarded(|| mw(&mut ctx)) {
                error!(event, "Error in event middleware: {e:#}");
                return self.dispatch(event, args);
            }
            if ctx.prevent_default {
                return false;
            }
        }
        self.dispatch(event, &ctx.args)
    }

    /// Emits on the next scheduler tick. Must be called inside a Tokio runtime.
    pub fn emit_async(&self, event: impl Into<String>, args: Vec<Value>) -> JoinHandle<bool> {
        let bus = self.clone();
        let event = event.into();
        tokio::spawn(async move { bus.emit(&event, &args) })
    }

    /// Resolves with the arguments of the next `event` emission.
    ///
    /// The listener is registered immediately, before the returned future is
    /// first polled, so an emission right after this call is not missed.
    pub fn wait_for(
        &self,
        event: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = BusResult<Vec<Value>>> + Send + 'static + use<> {
        let (tx, rx) = oneshot::channel::<Vec<Value>>();
        let tx = Mutex::new(Some(tx));
        let subscription = self.once(event, move |e| {
            if let Some(tx) = lock(&tx).take() {
                let _ = tx.send(e.args.to_vec());
            }
            Ok(())
        });
        let event = event.to_string();

        async move {
            match timeout {
                None => rx.await.map_err(|_| BusError::Closed(event)),
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(result) => result.map_err(|_| BusError::Closed(event)),
                    Err(_) => {
                        subscription.unsubscribe();
                        Err(BusError::Timeout {
                            event,
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }
                },
            }
        }
    }

    fn dispatch(&self, event: &str, args: &[Value]) -> bool {
        if self.is_debug() {
            trace!(event, args = args.len(), "Emitting event");
        }

        let batches = self.take_targets(event);
        let emission = Emission { event, args };
        let mut has_listeners = false;

        for (pattern, handlers) in &batches {
            for handler in handlers {
                has_listeners = true;
                if let Err(e) = guarded(|| handler(&emission)) {
                    error!(event, listener = %pattern, "Error in event listener: {e:#}");
                }
            }
        }
        has_listeners
    }

    /// Snapshots the handlers for an emission, most specific pattern first.
    /// `once` listeners are removed here, before they run, so a reentrant
    /// emit from inside a handler cannot deliver to them twice.
    fn take_targets(&self, event: &str) -> Vec<(String, Vec<Handler>)> {
        let mut listeners = lock(&self.inner.listeners);
        let mut batches = Vec::new();

        for pattern in match_patterns(event) {
            let Some(list) = listeners.get_mut(&pattern) else {
                continue;
            };
            let mut ordered: Vec<&Listener> = list.iter().collect();
            ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
            let handlers: Vec<Handler> = ordered.iter().map(|l| Arc::clone(&l.handler)).collect();

            list.retain(|l| !l.once);
            if list.is_empty() {
                listeners.remove(&pattern);
            }
            batches.push((pattern, handlers));
        }
        batches
    }

    // ================================================================
    // Composition
    // ================================================================

    /// Returns a facade that prefixes every event name with `prefix.`.
    pub fn namespace(&self, prefix: &str) -> Namespaced {
        Namespaced::new(self.clone(), prefix)
    }

    /// Installs a middleware. The most recently installed middleware runs first.
    pub fn use_middleware<F>(&self, f: F)
    where
        F: Fn(&mut EmitContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.inner.middleware).push(Arc::new(f));
    }

    /// Forwards events from this bus to `target`, prefixing their names.
    pub fn pipe(&self, target: &EventBus, selector: PipeSelector, prefix: &str) -> Vec<Subscription> {
        let patterns = match selector {
            PipeSelector::All => vec![GLOBAL_EVENT.to_string()],
            PipeSelector::Events(events) => events,
        };

        patterns
            .into_iter()
            .map(|pattern| {
                let target = target.clone();
                let prefix = prefix.to_string();
                self.on(
                    &pattern,
                    move |e| {
                        target.emit(&format!("{prefix}{}", e.event), e.args);
                        Ok(())
                    },
                    ListenerOptions::default(),
                )
            })
            .collect()
    }

    // ================================================================
    // Introspection
    // ================================================================

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.inner.listeners).get(event).map_or(0, Vec::len)
    }

    /// Event names with their listener counts.
    pub fn events(&self) -> BTreeMap<String, usize> {
        lock(&self.inner.listeners)
            .iter()
            .map(|(name, list)| (name.clone(), list.len()))
            .collect()
    }

    pub fn set_max_listeners(&self, max: usize) {
        self.inner.max_listeners.store(max, Ordering::Relaxed);
    }

    pub fn max_listeners(&self) -> usize {
        self.inner.max_listeners.load(Ordering::Relaxed)
    }

    /// Enables trace-level logging of subscriptions and emissions.
    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn is_debug(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }
}

/// Listener keys that receive `event`: the exact name, each dot-prefix
/// wildcard from most to least specific, then the global key.
fn match_patterns(event: &str) -> Vec<String> {
    let mut patterns = vec![event.to_string()];
    let parts: Vec<&str> = event.split('.').collect();
    for i in (0..parts.len()).rev() {
        let wildcard = format!("{}{}", parts[..=i].join("."), WILDCARD_SUFFIX);
        if !patterns.contains(&wildcard) {
            patterns.push(wildcard);
        }
    }
    if event != GLOBAL_EVENT {
        patterns.push(GLOBAL_EVENT.to_string());
    }
    patterns
}

fn guarded<F>(f: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
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
