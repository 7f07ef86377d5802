//! Plugin host for the Loom workspace.
//!
//! Plugins are compiled in. A [`PluginRegistry`] maps each name to a
//! factory; the [`PluginHostManager`] instantiates plugins from it, runs
//! their lifecycle hooks, resolves declared dependencies and mirrors the
//! loaded/enabled sets into the state store.
//!
//! ```text
//! unregistered -> loaded -> enabled <-> disabled -> unloaded
//! ```
//!
//! Lifecycle events are emitted on the bus as `plugin:loaded`,
//! `plugin:enabled`, `plugin:disabled` and `plugin:unloaded`, each with the
//! plugin name as the only argument.

mod api;
mod error;
mod manager;
mod plugin;
mod policy;
mod registry;

pub use api::{PluginApi, PluginContext};
pub use error::{PluginError, PluginHostError};
pub use manager::{
    EVENT_DISABLED, EVENT_ENABLED, EVENT_LOADED, EVENT_UNLOADED, LoadOptions, PluginHostManager, PluginInfo,
};
pub use plugin::{Plugin, PluginMetadata};
pub use policy::{PolicyConfig, PolicyEngine, PolicyMode};
pub use registry::{PluginFactory, PluginOrigin, PluginRegistry};
