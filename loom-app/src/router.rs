//! Headless section router.
//!
//! Sections are named routes. Navigating runs the leave guard of the
//! current route and the enter guard of the target; either may veto. A
//! successful navigation emits, in order:
//!
//! ```text
//! router:leave <from>     (only when leaving a route)
//! section:hidden <from>   (only when leaving a route)
//! section:changed <to>
//! router:enter <to> <data>
//! router:changed {from, to, data}
//! ```
//!
//! Back/forward history is kept in memory.

use loom_bus::{EventBus, ListenerOptions, Subscription};
use loom_features::events::ROUTER_NAVIGATE;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

pub const EVENT_LEAVE: &str = "router:leave";
pub const EVENT_ENTER: &str = "router:enter";
pub const EVENT_CHANGED: &str = "router:changed";
pub const EVENT_ERROR: &str = "router:error";
pub const EVENT_SECTION_CHANGED: &str = "section:changed";
pub const EVENT_SECTION_HIDDEN: &str = "section:hidden";

pub const DEFAULT_ROUTE: &str = "projects";

/// Navigation guard: `(route, other)` → allow? For `before_enter` the
/// arguments are the target and the route being left; for `before_leave`
/// they are the current route and the target.
pub type Guard = Arc<dyn Fn(&str, Option<&str>) -> anyhow::Result<bool> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Route {
    pub before_enter: Option<Guard>,
    pub before_leave: Option<Guard>,
    /// Data used when a navigation carries none.
    pub data: Value,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_enter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.before_enter = Some(Arc::new(f));
        self
    }

    pub fn before_leave<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.before_leave = Some(Arc::new(f));
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("before_enter", &self.before_enter.is_some())
            .field("before_leave", &self.before_leave.is_some())
            .field("data", &self.data)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentRoute {
    pub name: String,
    pub data: Value,
}

/// A parsed `#route?key=value` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub route: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Entry {
    route: String,
    data: Value,
}

#[derive(Debug, Default)]
struct History {
    entries: Vec<Entry>,
    index: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum HistoryMode {
    Push,
    Replace,
    Move(usize),
}

struct RouterInner {
    bus: EventBus,
    routes: Mutex<Vec<(String, Route)>>,
    current: Mutex<Option<CurrentRoute>>,
    default_route: Mutex<String>,
    history: Mutex<History>,
    subscriptions: Mutex<Vec<Subscription>>,
    started: AtomicBool,
}

/// Cloning yields another handle to the same router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .field("current", &self.current_route())
            .finish()
    }
}

impl Router {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                bus,
                routes: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                default_route: Mutex::new(DEFAULT_ROUTE.to_string()),
                history: Mutex::new(History::default()),
                subscriptions: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Adds or replaces a route.
    pub fn register(&self, name: &str, route: Route) {
        let mut routes = lock(&self.inner.routes);
        match routes.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = route,
            None => routes.push((name.to_string(), route)),
        }
    }

    /// Listens for `router:navigate <name> [data]` and enters the default route.
    pub fn start(&self) {
        self.start_at(None);
    }

    /// Like [`start`](Self::start), entering the route named by `hash` when it
    /// parses to one.
    pub fn start_at(&self, hash: Option<&str>) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listen(ROUTER_NAVIGATE);

        let initial = hash
            .and_then(Self::parse_hash)
            .map(|location| location.route)
            .unwrap_or_else(|| self.default_route());
        self.navigate_with(&initial, Value::Null, HistoryMode::Replace);
    }

    /// Treats `event` as a navigation request: the first argument names the
    /// route, the optional second carries data.
    pub fn listen(&self, event: &str) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.bus.on(
            event,
            move |emission| {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                let name = emission
                    .arg(0)
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("{} expects a route name", emission.event))?;
                Router { inner }.navigate(name, emission.arg(1).clone());
                Ok(())
            },
            ListenerOptions::default(),
        );
        lock(&self.inner.subscriptions).push(subscription);
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Navigates to `name`, falling back to the default route for unknown
    /// names. Returns `false` if a guard vetoed or failed.
    pub fn navigate(&self, name: &str, data: Value) -> bool {
        self.navigate_with(name, data, HistoryMode::Push)
    }

    /// Navigates without adding a history entry; the current entry is overwritten.
    pub fn replace(&self, name: &str, data: Value) -> bool {
        self.navigate_with(name, data, HistoryMode::Replace)
    }

    pub fn back(&self) -> bool {
        self.step(-1)
    }

    pub fn forward(&self) -> bool {
        self.step(1)
    }

    pub fn can_go_back(&self) -> bool {
        lock(&self.inner.history).index.is_some_and(|i| i > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        let history = lock(&self.inner.history);
        history.index.is_some_and(|i| i + 1 < history.entries.len())
    }

    fn step(&self, delta: isize) -> bool {
        let (target, entry) = {
            let history = lock(&self.inner.history);
            let Some(index) = history.index else {
                return false;
            };
            let Some(target) = index.checked_add_signed(delta) else {
                return false;
            };
            match history.entries.get(target) {
                Some(entry) => (target, entry.clone()),
                None => return false,
            }
        };
        self.navigate_with(&entry.route, entry.data, HistoryMode::Move(target))
    }

    fn navigate_with(&self, requested: &str, data: Value, mode: HistoryMode) -> bool {
        let (name, route) = match self.route(requested) {
            Some(route) => (requested.to_string(), route),
            None => {
                let fallback = self.default_route();
                warn!(route = %requested, fallback = %fallback, "Route not found, falling back to default");
                match self.route(&fallback) {
                    Some(route) => (fallback, route),
                    None => {
                        warn!(route = %fallback, "Default route is not registered");
                        return false;
                    }
                }
            }
        };

        let previous = lock(&self.inner.current).as_ref().map(|c| c.name.clone());

        if let Some(from) = previous.as_deref()
            && let Some(guard) = self.route(from).and_then(|r| r.before_leave)
            && !self.run_guard(&guard, from, Some(&name))
        {
            debug!(from, to = %name, "Navigation vetoed by leave guard");
            return false;
        }
        if let Some(guard) = &route.before_enter
            && !self.run_guard(guard, &name, previous.as_deref())
        {
            debug!(to = %name, "Navigation vetoed by enter guard");
            return false;
        }

        let data = if data.is_null() { route.data.clone() } else { data };
        self.record(mode, &name, &data);
        *lock(&self.inner.current) = Some(CurrentRoute {
            name: name.clone(),
            data: data.clone(),
        });

        let bus = &self.inner.bus;
        if let Some(from) = &previous {
            bus.emit(EVENT_LEAVE, &[json!(from)]);
            bus.emit(EVENT_SECTION_HIDDEN, &[json!(from)]);
        }
        bus.emit(EVENT_SECTION_CHANGED, &[json!(name)]);
        bus.emit(EVENT_ENTER, &[json!(name), data.clone()]);
        bus.emit(EVENT_CHANGED, &[json!({ "from": previous, "to": name, "data": data })]);
        debug!(to = %name, "Navigated");
        true
    }

    fn run_guard(&self, guard: &Guard, route: &str, other: Option<&str>) -> bool {
        match guard(route, other) {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(route, error = %e, "Navigation guard failed");
                self.inner
                    .bus
                    .emit(EVENT_ERROR, &[json!({ "route": route, "error": e.to_string() })]);
                false
            }
        }
    }

    fn record(&self, mode: HistoryMode, name: &str, data: &Value) {
        let entry = Entry {
            route: name.to_string(),
            data: data.clone(),
        };
        let mut history = lock(&self.inner.history);
        match (mode, history.index) {
            (HistoryMode::Move(index), _) => history.index = Some(index),
            (HistoryMode::Replace, Some(index)) => history.entries[index] = entry,
            (HistoryMode::Push, Some(index)) => {
                history.entries.truncate(index + 1);
                history.entries.push(entry);
                history.index = Some(index + 1);
            }
            (HistoryMode::Replace | HistoryMode::Push, None) => {
                history.entries = vec![entry];
                history.index = Some(0);
            }
        }
    }

    fn route(&self, name: &str) -> Option<Route> {
        lock(&self.inner.routes)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, route)| route.clone())
    }

    pub fn current_route(&self) -> Option<CurrentRoute> {
        lock(&self.inner.current).clone()
    }

    pub fn has_route(&self, name: &str) -> bool {
        lock(&self.inner.routes).iter().any(|(n, _)| n == name)
    }

    /// Route names in registration order.
    pub fn routes(&self) -> Vec<String> {
        lock(&self.inner.routes).iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn default_route(&self) -> String {
        lock(&self.inner.default_route).clone()
    }

    pub fn set_default_route(&self, name: &str) {
        *lock(&self.inner.default_route) = name.to_string();
    }

    /// `#route`, with `params` form-encoded as a query string.
    pub fn url(route: &str, params: &[(&str, &str)]) -> String {
        if params.is_empty() {
            return format!("#{route}");
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        format!("#{route}?{query}")
    }

    /// Splits `#route?key=value` into its parts. An empty route yields `None`.
    pub fn parse_hash(hash: &str) -> Option<Location> {
        let hash = hash.strip_prefix('#').unwrap_or(hash);
        let (route, query) = hash.split_once('?').unwrap_or((hash, ""));
        if route.is_empty() {
            return None;
        }
        let params = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Some(Location {
            route: route.to_string(),
            params,
        })
    }

    /// Stops listening and forgets routes, history and the current route.
    pub fn destroy(&self) {
        let subscriptions: Vec<Subscription> = lock(&self.inner.subscriptions).drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        lock(&self.inner.routes).clear();
        *lock(&self.inner.current) = None;
        *lock(&self.inner.history) = History::default();
        self.inner.started.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encodes_params() {
        assert_eq!(Router::url("projects", &[]), "#projects");
        assert_eq!(
            Router::url("chat", &[("q", "hello world"), ("page", "2")]),
            "#chat?q=hello+world&page=2"
        );
    }

    #[test]
    fn parse_hash_variants() {
        assert_eq!(Router::parse_hash(""), None);
        assert_eq!(Router::parse_hash("#"), None);

        let location = Router::parse_hash("#chat?q=hello+world&page=2").unwrap();
        assert_eq!(location.route, "chat");
        assert_eq!(location.params["q"], "hello world");
        assert_eq!(location.params["page"], "2");

        assert_eq!(Router::parse_hash("artifacts").unwrap().route, "artifacts");
    }

    #[test]
    fn history_push_truncates_forward_entries() {
        let router = Router::new(EventBus::new());
        for name in ["a", "b", "c"] {
            router.register(name, Route::new());
        }
        router.set_default_route("a");
        router.start();
        router.navigate("b", Value::Null);
        router.navigate("c", Value::Null);

        assert!(router.back());
        assert!(router.back());
        assert!(!router.back());
        assert!(router.can_go_forward());

        router.navigate("c", Value::Null);
        assert!(!router.can_go_forward());
        assert!(router.back());
        assert_eq!(router.current_route().unwrap().name, "a");
    }
}
