use crate::error::PluginError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptive data a plugin reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            author: None,
        }
    }
}

/// A lifecycle-managed feature module.
///
/// Every hook has a no-op default, so a plugin only implements what it
/// needs. Instances are shared (`Arc<dyn Plugin>`) and the host never holds
/// a lock while calling into them, so hooks may freely use the bus, the
/// store and the host itself.
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }

    /// Names of plugins that must be enabled before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once, right after instantiation.
    fn init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn enable(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn disable(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called on unload. Failures are logged by the host.
    fn destroy(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn update_config(&self, config: &Value) {
        let _ = config;
    }

    /// Dispatches a named method with JSON arguments.
    fn call(&self, method: &str, args: &[Value]) -> Result<Value, PluginError> {
        let _ = args;
        Err(PluginError::MethodNotFound(method.to_string()))
    }
}
