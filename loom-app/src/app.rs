use crate::config::AppConfig;
use crate::error::AppResult;
use crate::router::{EVENT_SECTION_CHANGED, Route, Router};
use loom_bus::{EventBus, ListenerOptions, Subscription};
use loom_features::{ArtifactDraft, CORE_PLUGINS, ProjectDraft, artifacts, chat, projects, register_core};
use loom_plugin_host::{LoadOptions, PluginHostManager, PluginOrigin, PluginRegistry, PolicyEngine};
use loom_state::{StateStore, StateSubscription, paths};
use loom_storage::{FileBackend, MemoryBackend, StorageBackend, StorageManager, keys};
use loom_types::{Artifact, Chat, ChatId, Message, Project};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const EVENT_INITIALIZED: &str = "app:initialized";
pub const EVENT_THEME_CHANGED: &str = "app:theme-changed";
pub const EVENT_SIDEBAR_TOGGLE: &str = "app:sidebar-toggle";
pub const EVENT_NAVIGATE: &str = "app:navigate";
pub const EVENT_SAVE_STATE: &str = "app:save-state";

const DEFAULT_THEME: &str = "light";

/// Sections the router knows about.
pub const SECTIONS: [&str; 5] = ["projects", "chat", "active-chat", "knowledge", "artifacts"];

/// The composition root: one bus, one store, one storage, the plugin host
/// and the router, wired together.
pub struct LoomApp {
    config: AppConfig,
    bus: EventBus,
    store: StateStore,
    storage: StorageManager,
    host: PluginHostManager,
    router: Router,
    listeners: Mutex<Vec<Subscription>>,
    watchers: Mutex<Vec<StateSubscription>>,
    initialized: AtomicBool,
}

impl LoomApp {
    /// Opens the file-backed store under the configured data directory.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let path = config.storage.storage_file();
        let backend = FileBackend::open(&path)?;
        info!(path = %path.display(), "Opened storage");
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// An app whose storage lives only as long as the process.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::with_backend(config, Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(config: AppConfig, backend: Arc<dyn StorageBackend>) -> Self {
        let bus = EventBus::new();
        bus.set_max_listeners(config.bus.max_listeners);
        bus.set_debug(config.bus.debug);

        let store = StateStore::new();
        let storage = StorageManager::new(backend, config.storage.prefix.clone());

        let mut registry = PluginRegistry::new();
        register_core(&mut registry);
        let host = PluginHostManager::with_policy(
            registry,
            bus.clone(),
            store.clone(),
            storage.clone(),
            PolicyEngine::with_config(config.plugins.policy.clone()),
        );
        let router = Router::new(bus.clone());

        Self {
            config,
            bus,
            store,
            storage,
            host,
            router,
            listeners: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Restores persisted settings, loads plugins and starts the router.
    /// Calling it again does nothing.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.load_application_state();
        self.register_routes();
        self.load_plugins();
        self.setup_global_listeners();
        self.router.start();

        self.bus.emit(EVENT_INITIALIZED, &[]);
        info!(plugins = self.host.plugin_count(), "Loom workspace initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn load_application_state(&self) {
        let theme = self
            .storage
            .get(keys::THEME)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_THEME.to_string());
        self.store.set(paths::APP_THEME, json!(theme));

        let collapsed = self
            .storage
            .get(keys::SIDEBAR_COLLAPSED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.store.set(paths::APP_SIDEBAR_COLLAPSED, json!(collapsed));

        if let Some(user @ Value::Object(_)) = self.storage.get(keys::USER_DATA) {
            self.store.set(paths::USER, user);
        }
        debug!(%theme, collapsed, "Application state restored");
    }

    fn register_routes(&self) {
        for section in SECTIONS {
            self.router.register(section, Route::new());
        }
    }

    fn load_plugins(&self) {
        let saved = self.storage.get(keys::PLUGIN_STATE).unwrap_or(Value::Null);
        if let Some(configs) = saved.get("configs").and_then(Value::as_object) {
            for (name, config) in configs {
                self.host.set_config(name, config.clone());
            }
        }
        for (name, config) in self.config.plugin_configs() {
            self.host.set_config(&name, config);
        }

        for name in CORE_PLUGINS {
            if let Err(e) = self.host.load_plugin(name, LoadOptions::core()) {
                warn!(plugin = %name, error = %e, "Failed to load core plugin");
            }
        }

        let mut optional: BTreeSet<String> = self.config.plugins.optional.iter().cloned().collect();
        optional.extend(string_list(&self.store.get_or(paths::APP_ENABLED_PLUGINS, json!([]))));
        optional.extend(string_list(saved.get("enabled").unwrap_or(&Value::Null)));

        for name in optional {
            if self.host.is_loaded(&name) {
                continue;
            }
            let options = LoadOptions {
                core: self.host.registry().origin_of(&name) == Some(PluginOrigin::Core),
                auto_enable: true,
            };
            if let Err(e) = self.host.load_plugin(&name, options) {
                warn!(plugin = %name, error = %e, "Failed to load plugin");
            }
        }
    }

    fn setup_global_listeners(&self) {
        let mut listeners = lock(&self.listeners);

        let (store, storage) = (self.store.clone(), self.storage.clone());
        listeners.push(self.bus.on(
            EVENT_THEME_CHANGED,
            move |emission| {
                let theme = emission
                    .arg(0)
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("theme must be a string"))?;
                store.set(paths::APP_THEME, json!(theme));
                storage.set(keys::THEME, &json!(theme));
                Ok(())
            },
            ListenerOptions::default(),
        ));

        let (store, storage) = (self.store.clone(), self.storage.clone());
        listeners.push(self.bus.on(
            EVENT_SIDEBAR_TOGGLE,
            move |_| {
                let collapsed = !store
                    .get(paths::APP_SIDEBAR_COLLAPSED)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                store.set(paths::APP_SIDEBAR_COLLAPSED, json!(collapsed));
                storage.set(keys::SIDEBAR_COLLAPSED, &json!(collapsed));
                Ok(())
            },
            ListenerOptions::default(),
        ));

        let store = self.store.clone();
        listeners.push(self.bus.on(
            EVENT_SECTION_CHANGED,
            move |emission| {
                store.set(paths::APP_CURRENT_SECTION, emission.arg(0).clone());
                Ok(())
            },
            ListenerOptions::default(),
        ));
        drop(listeners);

        self.router.listen(EVENT_NAVIGATE);

        let storage = self.storage.clone();
        let watcher = self.store.subscribe(paths::USER, move |change| {
            storage.set(keys::USER_DATA, change.new_value);
            Ok(())
        });
        lock(&self.watchers).push(watcher);
    }

    // ================================================================
    // Accessors
    // ================================================================

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn plugins(&self) -> &PluginHostManager {
        &self.host
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ================================================================
    // Settings
    // ================================================================

    pub fn theme(&self) -> String {
        self.store
            .get(paths::APP_THEME)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_THEME.to_string())
    }

    pub fn set_theme(&self, theme: &str) {
        self.bus.emit(EVENT_THEME_CHANGED, &[json!(theme)]);
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.store
            .get(paths::APP_SIDEBAR_COLLAPSED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn toggle_sidebar(&self) {
        self.bus.emit(EVENT_SIDEBAR_TOGGLE, &[]);
    }

    /// Shallow-merges `partial` into the user profile, which is persisted.
    pub fn update_user(&self, partial: Value) -> AppResult<()> {
        self.store.update(paths::USER, partial)?;
        Ok(())
    }

    pub fn navigate(&self, section: &str) -> bool {
        self.router.navigate(section, Value::Null)
    }

    // ================================================================
    // Features
    // ================================================================

    fn call<T: DeserializeOwned>(&self, plugin: &str, method: &str, args: &[Value]) -> AppResult<T> {
        let value = self.host.call_plugin_method(plugin, method, args)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn projects(&self) -> AppResult<Vec<Project>> {
        self.call(projects::NAME, "list", &[])
    }

    pub fn create_project(&self, draft: &ProjectDraft) -> AppResult<Project> {
        self.call(projects::NAME, "create", &[serde_json::to_value(draft)?])
    }

    pub fn chats(&self, filter: Option<&str>) -> AppResult<Vec<Chat>> {
        match filter {
            Some(query) => self.call(chat::NAME, "filter", &[json!(query)]),
            None => self.call(chat::NAME, "list", &[]),
        }
    }

    pub fn create_chat(&self) -> AppResult<Chat> {
        self.call(chat::NAME, "create", &[])
    }

    pub fn open_chat(&self, id: ChatId) -> AppResult<()> {
        self.host.call_plugin_method(chat::NAME, "open", &[json!(id)])?;
        Ok(())
    }

    /// Sends `text` to the open chat and waits for the reply.
    pub async fn send_message(&self, text: &str) -> AppResult<Option<Message>> {
        Ok(chat::send_message(&self.host, text).await?)
    }

    pub fn artifacts(&self) -> AppResult<Vec<Artifact>> {
        self.call(artifacts::NAME, "list", &[])
    }

    pub fn create_artifact(&self, draft: &ArtifactDraft) -> AppResult<Artifact> {
        self.call(artifacts::NAME, "create", &[serde_json::to_value(draft)?])
    }

    // ================================================================
    // Persistence
    // ================================================================

    /// Writes settings and plugin state to storage.
    pub fn save_state(&self) {
        let app_state = json!({
            "theme": self.store.get(paths::APP_THEME),
            "sidebarCollapsed": self.store.get(paths::APP_SIDEBAR_COLLAPSED),
            "lastSection": self.store.get(paths::APP_CURRENT_SECTION),
        });
        if !self.storage.set(keys::APP_STATE, &app_state) {
            warn!("Failed to save application state");
        }
        if !self.storage.set(keys::PLUGIN_STATE, &self.host.export_state()) {
            warn!("Failed to save plugin state");
        }
        self.bus.emit(EVENT_SAVE_STATE, &[]);
    }

    /// Full storage export (`{data, exportDate, version}`).
    pub fn export(&self) -> Value {
        self.storage.export()
    }

    /// Saves state, unloads every plugin and stops the router.
    pub fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        self.save_state();

        // Dependents first: repeat until nothing more can be unloaded.
        loop {
            let mut progressed = false;
            for info in self.host.get_plugins() {
                if self.host.get_dependents(&info.name).iter().any(|d| self.host.is_loaded(d)) {
                    continue;
                }
                match self.host.unload_plugin(&info.name) {
                    Ok(()) => progressed = true,
                    Err(e) => warn!(plugin = %info.name, error = %e, "Failed to unload plugin"),
                }
            }
            if !progressed || self.host.plugin_count() == 0 {
                break;
            }
        }

        let listeners: Vec<Subscription> = lock(&self.listeners).drain(..).collect();
        for subscription in listeners {
            subscription.unsubscribe();
        }
        let watchers: Vec<StateSubscription> = lock(&self.watchers).drain(..).collect();
        for watcher in watchers {
            watcher.unsubscribe();
        }
        self.router.destroy();
        info!("Loom workspace shut down");
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
