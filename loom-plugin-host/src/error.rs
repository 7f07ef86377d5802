//! Error types for the plugin host.

use thiserror::Error;

/// Errors reported by plugin instances themselves.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin is not loaded: {0}")]
    NotLoaded(String),

    #[error("plugin is not enabled: {0}")]
    NotEnabled(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("method '{method}' not found on plugin '{plugin}'")]
    MethodNotFound { plugin: String, method: String },

    #[error("dependency '{dependency}' of plugin '{plugin}' failed: {source}")]
    DependencyFailed {
        plugin: String,
        dependency: String,
        #[source]
        source: Box<PluginHostError>,
    },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("cannot disable '{plugin}': plugins {} depend on it", .dependents.join(", "))]
    HasDependents {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },
}

impl PluginHostError {
    pub(crate) fn plugin(name: &str, source: PluginError) -> Self {
        Self::Plugin {
            plugin: name.to_string(),
            source,
        }
    }
}
