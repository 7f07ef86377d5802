//! Static name-to-factory registry.

use crate::api::PluginContext;
use crate::error::PluginError;
use crate::plugin::Plugin;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a plugin instance from its context.
pub type PluginFactory =
    Arc<dyn Fn(PluginContext) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync>;

/// Where a plugin comes from: a built-in feature, or an optional add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginOrigin {
    Core,
    Optional,
}

#[derive(Clone)]
struct RegistryEntry {
    origin: PluginOrigin,
    factory: PluginFactory,
}

/// Every plugin the host can instantiate, keyed by name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a factory. A name can be registered only once; later attempts
    /// are logged and ignored.
    pub fn register<F>(&mut self, name: &str, origin: PluginOrigin, factory: F) -> bool
    where
        F: Fn(PluginContext) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        if self.entries.contains_key(name) {
            warn!(plugin = %name, "Plugin is already registered");
            return false;
        }
        self.entries.insert(
            name.to_string(),
            RegistryEntry {
                origin,
                factory: Arc::new(factory),
            },
        );
        debug!(plugin = %name, ?origin, "Plugin registered");
        true
    }

    /// Factory for `name`, only if it was registered with `origin`.
    pub fn resolve(&self, name: &str, origin: PluginOrigin) -> Option<PluginFactory> {
        self.entries
            .get(name)
            .filter(|e| e.origin == origin)
            .map(|e| Arc::clone(&e.factory))
    }

    pub fn origin_of(&self, name: &str) -> Option<PluginOrigin> {
        self.entries.get(name).map(|e| e.origin)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
