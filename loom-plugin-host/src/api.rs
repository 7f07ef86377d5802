//! What a plugin receives from the host.

use crate::error::PluginHostError;
use crate::manager::{HostInner, PluginHostManager};
use loom_bus::{Emission, EventBus, ListenerOptions, Namespaced, Subscription};
use loom_state::{StateStore, paths};
use loom_storage::StorageManager;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Weak;

/// Handed to a plugin factory when the host instantiates a plugin.
#[derive(Clone)]
pub struct PluginContext {
    pub name: String,
    pub bus: EventBus,
    pub store: StateStore,
    pub storage: StorageManager,
    pub api: PluginApi,
    /// Configuration set for this plugin before it was loaded (`{}` if none).
    pub config: Value,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A plugin's scoped view of the host.
///
/// Events go through the `plugin.<name>` namespace and state lives under
/// `plugins.<name>.`. The API holds only a weak reference to the host.
#[derive(Clone)]
pub struct PluginApi {
    name: String,
    events: Namespaced,
    store: StateStore,
    host: Weak<HostInner>,
}

impl PluginApi {
    pub(crate) fn new(name: &str, bus: &EventBus, store: StateStore, host: Weak<HostInner>) -> Self {
        Self {
            name: name.to_string(),
            events: bus.namespace(&format!("plugin.{name}")),
            store,
            host,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.name
    }

    pub fn on<F>(&self, event: &str, f: F) -> Subscription
    where
        F: Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.on(event, f, ListenerOptions::default())
    }

    pub fn emit(&self, event: &str, data: Value) -> bool {
        self.events.emit(event, &[data])
    }

    pub fn get_state(&self, path: &str) -> Option<Value> {
        self.store.get(&paths::plugin_scope(&self.name, path))
    }

    pub fn get_state_or(&self, path: &str, default: Value) -> Value {
        self.get_state(path).unwrap_or(default)
    }

    pub fn set_state(&self, path: &str, value: Value) {
        self.store.set(&paths::plugin_scope(&self.name, path), value);
    }

    fn host(&self) -> Option<PluginHostManager> {
        self.host.upgrade().map(PluginHostManager::from_inner)
    }

    /// Calls a method on another enabled plugin.
    pub fn call_plugin(&self, target: &str, method: &str, args: &[Value]) -> Result<Value, PluginHostError> {
        match self.host() {
            Some(host) => host.call_plugin_method(target, method, args),
            None => Err(PluginHostError::PluginNotFound(target.to_string())),
        }
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.host().is_some_and(|host| host.is_enabled(name))
    }

    pub fn get_config(&self) -> Value {
        self.host()
            .map_or_else(|| Value::Object(Map::new()), |host| host.get_config(&self.name))
    }

    /// Shallow-merges `partial` into this plugin's configuration.
    pub fn update_config(&self, partial: Value) {
        let Some(host) = self.host() else {
            return;
        };
        let mut config = match host.get_config(&self.name) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(fields) = partial {
            config.extend(fields);
        }
        host.set_config(&self.name, Value::Object(config));
    }
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi").field("name", &self.name).finish()
    }
}
