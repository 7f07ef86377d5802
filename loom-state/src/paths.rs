//! Well-known paths in the state tree.

pub const APP_THEME: &str = "app.theme";
pub const APP_SIDEBAR_COLLAPSED: &str = "app.sidebarCollapsed";
pub const APP_CURRENT_SECTION: &str = "app.currentSection";
pub const APP_ENABLED_PLUGINS: &str = "app.enabledPlugins";
pub const USER: &str = "user";
pub const PROJECTS: &str = "projects";
pub const CHATS: &str = "chats";
pub const ARTIFACTS: &str = "artifacts";
pub const KNOWLEDGE_SOURCES: &str = "knowledgeSources";
pub const PLUGINS_LOADED: &str = "plugins.loaded";
pub const PLUGINS_ENABLED: &str = "plugins.enabled";
pub const PLUGINS_CONFIG: &str = "plugins.config";

/// Subscription key matching every change.
pub const GLOBAL: &str = "*";

/// Path of a plugin's private state subtree.
pub fn plugin_scope(plugin: &str, path: &str) -> String {
    format!("plugins.{plugin}.{path}")
}
