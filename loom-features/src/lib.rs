//! Feature plugins for the Loom workspace.
//!
//! Three core plugins live here:
//! - [`ProjectsPlugin`] (`projects`): project CRUD and starting a chat from a project
//! - [`ChatPlugin`] (`chat`): conversations, messages and simulated replies
//! - [`ArtifactsPlugin`] (`artifacts`): generated documents and the viewer panel
//!
//! Each plugin mirrors its list between the state tree and one storage
//! bucket while it is enabled, and answers JSON method calls routed through
//! [`PluginHostManager::call_plugin_method`](loom_plugin_host::PluginHostManager::call_plugin_method).

pub mod artifacts;
pub mod chat;
pub mod projects;

mod args;
mod listen;
mod notify;
mod slice;

pub use artifacts::{ArtifactDraft, ArtifactsPlugin, PanelState};
pub use chat::{ChatConfig, ChatPlugin, send_message};
pub use notify::NotificationKind;
pub use projects::{ProjectDraft, ProjectsPlugin};

use loom_plugin_host::{PluginMetadata, PluginOrigin, PluginRegistry};

/// Plugins the application loads at boot, in order. `knowledge` has no
/// implementation yet and is skipped with a warning.
pub const CORE_PLUGINS: [&str; 4] = [projects::NAME, chat::NAME, "knowledge", artifacts::NAME];

const VERSION: &str = "1.0.0";
const AUTHOR: &str = "Loom4 Team";

/// Bus events shared between the feature plugins and the shell.
pub mod events {
    /// `{message, type}` payload for a toast.
    pub const NOTIFICATION_SHOW: &str = "notification:show";
    /// Section name to switch to.
    pub const ROUTER_NAVIGATE: &str = "router:navigate";
    pub const CHAT_OPEN: &str = "chat:open";
    pub const CHAT_CREATE: &str = "chat:create";
    pub const CHAT_DELETE: &str = "chat:delete";
    pub const CHAT_TYPING: &str = "chat:typing";
    pub const ARTIFACT_VIEW: &str = "artifact:view";
    pub const ARTIFACT_CREATE: &str = "artifact:create";
    pub const ARTIFACT_PANEL_OPENED: &str = "artifact:panel-opened";
    pub const ARTIFACT_PANEL_CLOSED: &str = "artifact:panel-closed";
    pub const ARTIFACT_PANEL_RESIZED: &str = "artifact:panel-resized";
}

/// Registers every feature plugin as a core plugin.
pub fn register_core(registry: &mut PluginRegistry) {
    registry.register(projects::NAME, PluginOrigin::Core, ProjectsPlugin::factory);
    registry.register(chat::NAME, PluginOrigin::Core, ChatPlugin::factory);
    registry.register(artifacts::NAME, PluginOrigin::Core, ArtifactsPlugin::factory);
}

fn metadata(name: &str, description: &str) -> PluginMetadata {
    let mut metadata = PluginMetadata::new(name, VERSION, description);
    metadata.author = Some(AUTHOR.to_string());
    metadata
}
