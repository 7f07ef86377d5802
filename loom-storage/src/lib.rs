//! Local persistence for the Loom workspace.
//!
//! A [`StorageManager`] wraps a flat string [`StorageBackend`] and adds:
//!
//! - a key prefix (`<prefix>_<key>`), so several managers can share one backend
//! - an envelope per entry (`{value, timestamp, expires, version}`)
//! - expiry on read, cleanup of stale entries, and a single retry after
//!   cleanup when the backend reports its quota is full
//!
//! Two backends ship: [`MemoryBackend`] for tests and ephemeral sessions, and
//! [`FileBackend`], which keeps all entries in one JSON file.

mod backend;
mod error;
mod manager;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use loom_types::Removal;
pub use manager::{DEFAULT_PREFIX, Envelope, SetOptions, StorageManager, StorageSize};

/// Bucket names used by the workspace.
pub mod keys {
    pub const THEME: &str = "theme";
    pub const SIDEBAR_COLLAPSED: &str = "sidebar_collapsed";
    pub const USER_DATA: &str = "user_data";
    pub const PROJECTS: &str = "projects";
    pub const CHATS: &str = "chats";
    pub const ARTIFACTS: &str = "artifacts";
    pub const ARTIFACT_PANEL: &str = "artifact-panel";
    /// Theme, sidebar and last section, written on shutdown.
    pub const APP_STATE: &str = "app_state";
    /// Enabled plugins and their configuration.
    pub const PLUGIN_STATE: &str = "plugin_state";
}
