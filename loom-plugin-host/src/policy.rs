//! Load policy: which plugin names the host is allowed to instantiate.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Policy mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only listed plugins can be loaded.
    Allowlist,
    /// All plugins except listed ones can be loaded.
    Denylist,
    #[default]
    /// No restrictions.
    Unrestricted,
}

/// Policy configuration, usually read from the `[plugins.policy]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Plugin names the mode applies to.
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// Enforces policy decisions.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn with_config(config: PolicyConfig) -> Self {
        debug!(mode = ?config.mode, listed = config.plugins.len(), "Plugin policy configured");
        Self { config }
    }

    /// An engine that allows everything.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_plugin_allowed(&self, name: &str) -> bool {
        let listed = self.config.plugins.iter().any(|p| p == name);
        match self.config.mode {
            PolicyMode::Unrestricted => true,
            PolicyMode::Allowlist => listed,
            PolicyMode::Denylist => !listed,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}
