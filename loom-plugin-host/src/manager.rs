//! Central plugin lifecycle manager.
//!
//! Owns every loaded plugin instance, enforces the load policy and keeps
//! `plugins.loaded` / `plugins.enabled` in the state store in step with its
//! own bookkeeping. No lock is held while a plugin hook runs.

use crate::api::{PluginApi, PluginContext};
use crate::error::{PluginError, PluginHostError};
use crate::plugin::{Plugin, PluginMetadata};
use crate::policy::PolicyEngine;
use crate::registry::{PluginOrigin, PluginRegistry};
use loom_bus::EventBus;
use loom_state::{Removal, StateStore, paths};
use loom_storage::StorageManager;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

pub const EVENT_LOADED: &str = "plugin:loaded";
pub const EVENT_ENABLED: &str = "plugin:enabled";
pub const EVENT_DISABLED: &str = "plugin:disabled";
pub const EVENT_UNLOADED: &str = "plugin:unloaded";

/// Options for [`PluginHostManager::load_plugin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Resolve from the core features rather than optional plugins.
    pub core: bool,
    /// Enable right after `init`.
    pub auto_enable: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            core: false,
            auto_enable: true,
        }
    }
}

impl LoadOptions {
    pub fn core() -> Self {
        Self {
            core: true,
            ..Self::default()
        }
    }

    pub fn origin(&self) -> PluginOrigin {
        if self.core {
            PluginOrigin::Core
        } else {
            PluginOrigin::Optional
        }
    }
}

/// Summary returned by [`PluginHostManager::get_plugins`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub loaded: bool,
    pub enabled: bool,
    pub metadata: PluginMetadata,
}

struct PluginRecord {
    instance: Arc<dyn Plugin>,
    enabled: bool,
    metadata: PluginMetadata,
}

pub(crate) struct HostInner {
    registry: PluginRegistry,
    bus: EventBus,
    store: StateStore,
    storage: StorageManager,
    policy: PolicyEngine,
    plugins: Mutex<HashMap<String, PluginRecord>>,
    dependencies: Mutex<HashMap<String, Vec<String>>>,
    configs: Mutex<HashMap<String, Value>>,
}

/// Manages the lifecycle of all loaded plugins. Cloning yields another
/// handle to the same host.
#[derive(Clone)]
pub struct PluginHostManager {
    inner: Arc<HostInner>,
}

impl fmt::Debug for PluginHostManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHostManager")
            .field("registry", &self.inner.registry)
            .field("loaded", &self.plugin_count())
            .finish()
    }
}

impl PluginHostManager {
    pub fn new(registry: PluginRegistry, bus: EventBus, store: StateStore, storage: StorageManager) -> Self {
        Self::with_policy(registry, bus, store, storage, PolicyEngine::unrestricted())
    }

    pub fn with_policy(
        registry: PluginRegistry,
        bus: EventBus,
        store: StateStore,
        storage: StorageManager,
        policy: PolicyEngine,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                registry,
                bus,
                store,
                storage,
                policy,
                plugins: Mutex::new(HashMap::new()),
                dependencies: Mutex::new(HashMap::new()),
                configs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HostInner>) -> Self {
        Self { inner }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    // ================================================================
    // Loading / Unloading
    // ================================================================

    /// Instantiates `name`, runs its `init` hook and, unless disabled by
    /// `options`, enables it. Loading an already loaded plugin is a no-op.
    pub fn load_plugin(&self, name: &str, options: LoadOptions) -> Result<(), PluginHostError> {
        self.load_inner(name, options, &mut Vec::new())
    }

    fn load_inner(&self, name: &str, options: LoadOptions, visiting: &mut Vec<String>) -> Result<(), PluginHostError> {
        if self.is_loaded(name) {
            debug!(plugin = %name, "Plugin already loaded");
            return Ok(());
        }

        let factory = self
            .inner
            .registry
            .resolve(name, options.origin())
            .ok_or_else(|| PluginHostError::PluginNotFound(name.to_string()))?;

        if !self.inner.policy.is_plugin_allowed(name) {
            return Err(PluginHostError::PolicyDenied(format!("plugin '{name}' blocked by policy")));
        }

        let context = PluginContext {
            name: name.to_string(),
            bus: self.inner.bus.clone(),
            store: self.inner.store.clone(),
            storage: self.inner.storage.clone(),
            api: self.create_plugin_api(name),
            config: self.get_config(name),
        };
        let instance = factory(context).map_err(|e| PluginHostError::plugin(name, e))?;

        let dependencies = instance.dependencies();
        if !dependencies.is_empty() {
            lock(&self.inner.dependencies).insert(name.to_string(), dependencies);
        }
        lock(&self.inner.plugins).insert(
            name.to_string(),
            PluginRecord {
                instance: Arc::clone(&instance),
                enabled: false,
                metadata: instance.metadata(),
            },
        );
        self.push_state(paths::PLUGINS_LOADED, name);

        if let Err(e) = instance.init() {
            self.forget(name);
            return Err(PluginHostError::plugin(name, e));
        }

        if options.auto_enable {
            self.enable_inner(name, visiting)?;
        }

        self.inner.bus.emit(EVENT_LOADED, &[json!(name)]);
        info!(plugin = %name, "Plugin loaded");
        Ok(())
    }

    /// Disables (if needed), destroys and forgets `name`.
    pub fn unload_plugin(&self, name: &str) -> Result<(), PluginHostError> {
        if self.is_enabled(name) {
            self.disable_plugin(name)?;
        }

        let Some(instance) = self.instance(name) else {
            debug!(plugin = %name, "Plugin is not loaded");
            return Ok(());
        };

        if let Err(e) = instance.destroy() {
            warn!(plugin = %name, "Plugin destroy failed: {e}");
        }
        self.forget(name);

        self.inner.bus.emit(EVENT_UNLOADED, &[json!(name)]);
        info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    fn forget(&self, name: &str) {
        lock(&self.inner.plugins).remove(name);
        lock(&self.inner.dependencies).remove(name);
        self.remove_state(paths::PLUGINS_LOADED, name);
    }

    // ================================================================
    // Enable / Disable
    // ================================================================

    /// Enables a loaded plugin, loading and enabling its dependencies first.
    pub fn enable_plugin(&self, name: &str) -> Result<(), PluginHostError> {
        self.enable_inner(name, &mut Vec::new())
    }

    fn enable_inner(&self, name: &str, visiting: &mut Vec<String>) -> Result<(), PluginHostError> {
        let instance = {
            let plugins = lock(&self.inner.plugins);
            let record = plugins
                .get(name)
                .ok_or_else(|| PluginHostError::NotLoaded(name.to_string()))?;
            if record.enabled {
                debug!(plugin = %name, "Plugin already enabled");
                return Ok(());
            }
            Arc::clone(&record.instance)
        };

        visiting.push(name.to_string());
        let resolved = self.enable_dependencies(name, visiting);
        visiting.pop();
        resolved?;

        instance.enable().map_err(|e| PluginHostError::plugin(name, e))?;

        if let Some(record) = lock(&self.inner.plugins).get_mut(name) {
            record.enabled = true;
        }
        self.push_state(paths::PLUGINS_ENABLED, name);

        self.inner.bus.emit(EVENT_ENABLED, &[json!(name)]);
        info!(plugin = %name, "Plugin enabled");
        Ok(())
    }

    fn enable_dependencies(&self, name: &str, visiting: &mut Vec<String>) -> Result<(), PluginHostError> {
        for dependency in self.dependencies_of(name) {
            if self.is_enabled(&dependency) {
                continue;
            }
            if visiting.contains(&dependency) {
                let mut cycle = visiting.clone();
                cycle.push(dependency);
                return Err(PluginHostError::DependencyCycle(cycle));
            }

            let result = if self.is_loaded(&dependency) {
                self.enable_inner(&dependency, visiting)
            } else {
                let options = LoadOptions {
                    core: self.inner.registry.origin_of(&dependency) == Some(PluginOrigin::Core),
                    auto_enable: true,
                };
                self.load_inner(&dependency, options, visiting)
            };

            match result {
                Ok(()) => {}
                Err(e @ PluginHostError::DependencyCycle(_)) => return Err(e),
                Err(e) => {
                    error!(plugin = %name, dependency = %dependency, "Failed to load dependency: {e}");
                    return Err(PluginHostError::DependencyFailed {
                        plugin: name.to_string(),
                        dependency,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(())
    }

    /// Disables `name` unless an enabled plugin depends on it.
    pub fn disable_plugin(&self, name: &str) -> Result<(), PluginHostError> {
        let instance = {
            let plugins = lock(&self.inner.plugins);
            match plugins.get(name) {
                Some(record) if record.enabled => Arc::clone(&record.instance),
                _ => {
                    debug!(plugin = %name, "Plugin is not enabled");
                    return Ok(());
                }
            }
        };

        let dependents: Vec<String> = self
            .get_dependents(name)
            .into_iter()
            .filter(|d| self.is_enabled(d))
            .collect();
        if !dependents.is_empty() {
            return Err(PluginHostError::HasDependents {
                plugin: name.to_string(),
                dependents,
            });
        }

        instance.disable().map_err(|e| PluginHostError::plugin(name, e))?;

        if let Some(record) = lock(&self.inner.plugins).get_mut(name) {
            record.enabled = false;
        }
        self.remove_state(paths::PLUGINS_ENABLED, name);

        self.inner.bus.emit(EVENT_DISABLED, &[json!(name)]);
        info!(plugin = %name, "Plugin disabled");
        Ok(())
    }

    // ================================================================
    // Queries
    // ================================================================

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.instance(name)
    }

    fn instance(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        lock(&self.inner.plugins).get(name).map(|r| Arc::clone(&r.instance))
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        lock(&self.inner.plugins).contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        lock(&self.inner.plugins).get(name).is_some_and(|r| r.enabled)
    }

    pub fn plugin_count(&self) -> usize {
        lock(&self.inner.plugins).len()
    }

    /// Loaded plugins, sorted by name.
    pub fn get_plugins(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = lock(&self.inner.plugins)
            .iter()
            .map(|(name, record)| PluginInfo {
                name: name.clone(),
                loaded: true,
                enabled: record.enabled,
                metadata: record.metadata.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn dependencies_of(&self, name: &str) -> Vec<String> {
        lock(&self.inner.dependencies).get(name).cloned().unwrap_or_default()
    }

    /// Loaded plugins that declare `name` as a dependency, sorted.
    pub fn get_dependents(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = lock(&self.inner.dependencies)
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(plugin, _)| plugin.clone())
            .collect();
        dependents.sort();
        dependents
    }

    // ================================================================
    // Communication / Configuration
    // ================================================================

    /// Invokes `method` on an enabled plugin.
    pub fn call_plugin_method(&self, name: &str, method: &str, args: &[Value]) -> Result<Value, PluginHostError> {
        let instance = {
            let plugins = lock(&self.inner.plugins);
            let record = plugins
                .get(name)
                .ok_or_else(|| PluginHostError::PluginNotFound(name.to_string()))?;
            if !record.enabled {
                return Err(PluginHostError::NotEnabled(name.to_string()));
            }
            Arc::clone(&record.instance)
        };

        instance.call(method, args).map_err(|e| match e {
            PluginError::MethodNotFound(_) => PluginHostError::MethodNotFound {
                plugin: name.to_string(),
                method: method.to_string(),
            },
            other => PluginHostError::plugin(name, other),
        })
    }

    /// Stores configuration for `name` and forwards it to a loaded instance.
    pub fn set_config(&self, name: &str, config: Value) {
        lock(&self.inner.configs).insert(name.to_string(), config.clone());
        if let Some(instance) = self.instance(name) {
            instance.update_config(&config);
        }
    }

    pub fn get_config(&self, name: &str) -> Value {
        lock(&self.inner.configs)
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn create_plugin_api(&self, name: &str) -> PluginApi {
        PluginApi::new(
            name,
            &self.inner.bus,
            self.inner.store.clone(),
            Arc::downgrade(&self.inner),
        )
    }

    // ================================================================
    // Persistence of host state
    // ================================================================

    /// `{enabled, configs}` for the current session.
    pub fn export_state(&self) -> Value {
        let mut enabled: Vec<String> = lock(&self.inner.plugins)
            .iter()
            .filter(|(_, r)| r.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        enabled.sort();
        let configs: Map<String, Value> = lock(&self.inner.configs)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({ "enabled": enabled, "configs": configs })
    }

    /// Restores configs and re-enables the listed plugins. Individual
    /// failures are logged and skipped.
    pub fn restore_state(&self, state: &Value) {
        if let Some(configs) = state.get("configs").and_then(Value::as_object) {
            let mut stored = lock(&self.inner.configs);
            stored.clear();
            stored.extend(configs.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let Some(enabled) = state.get("enabled").and_then(Value::as_array) else {
            return;
        };
        for name in enabled.iter().filter_map(Value::as_str) {
            let options = LoadOptions {
                core: self.inner.registry.origin_of(name) == Some(PluginOrigin::Core),
                auto_enable: true,
            };
            let result = if self.is_loaded(name) {
                self.enable_plugin(name)
            } else {
                self.load_plugin(name, options)
            };
            if let Err(e) = result {
                error!(plugin = %name, "Failed to restore plugin: {e}");
            }
        }
    }

    // ================================================================
    // State mirroring
    // ================================================================

    fn push_state(&self, path: &str, name: &str) {
        if let Err(e) = self.inner.store.push(path, json!(name), false) {
            warn!(plugin = %name, path, "Failed to record plugin state: {e}");
        }
    }

    fn remove_state(&self, path: &str, name: &str) {
        if let Err(e) = self.inner.store.remove(path, Removal::Value(&json!(name))) {
            warn!(plugin = %name, path, "Failed to record plugin state: {e}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
