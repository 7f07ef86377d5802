//! Application configuration, read from `loom.toml`.
//!
//! ```toml
//! [storage]
//! prefix = "loom4"
//! data_dir = "/home/me/.local/share/loom"
//!
//! [bus]
//! max_listeners = 100
//! debug = false
//!
//! [plugins]
//! optional = ["word-count"]
//!
//! [plugins.policy]
//! mode = "denylist"
//! plugins = ["experimental"]
//!
//! [plugins.config.artifacts]
//! theme = "dark"
//!
//! [chat]
//! response_delay_ms = 1500
//! ```
//!
//! Every section is optional. A missing file runs with defaults; a file
//! that fails to parse is reported and also runs with defaults.

use loom_bus::DEFAULT_MAX_LISTENERS;
use loom_features::chat::{self, DEFAULT_RESPONSE_DELAY_MS};
use loom_plugin_host::PolicyConfig;
use loom_storage::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "loom.toml";
const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub bus: BusConfig,
    pub plugins: PluginsConfig,
    pub chat: ChatSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key prefix for every stored bucket.
    pub prefix: String,
    /// Directory holding `storage.json`. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            data_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn storage_file(&self) -> PathBuf {
        self.resolved_data_dir().join(STORAGE_FILE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub max_listeners: usize,
    pub debug: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_listeners: DEFAULT_MAX_LISTENERS,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Optional plugins to load after the core set.
    pub optional: Vec<String>,
    pub policy: PolicyConfig,
    /// Per-plugin configuration tables, keyed by plugin name.
    pub config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// Simulated thinking time before a reply.
    pub response_delay_ms: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            response_delay_ms: DEFAULT_RESPONSE_DELAY_MS,
        }
    }
}

impl AppConfig {
    /// Loads `loom.toml` from the platform config directory.
    pub fn load() -> Self {
        Self::load_from(default_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No configuration file found, using defaults");
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse configuration, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read configuration, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Configuration handed to each plugin at load time. The `[chat]`
    /// section is folded into the chat plugin's table unless that table
    /// sets the delay itself.
    pub fn plugin_configs(&self) -> BTreeMap<String, Value> {
        let mut configs = self.plugins.config.clone();
        let chat = configs
            .entry(chat::NAME.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(table) = chat {
            table
                .entry("response_delay_ms")
                .or_insert_with(|| json!(self.chat.response_delay_ms));
        }
        configs
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("loom"))
        .unwrap_or_else(|| PathBuf::from(".loom"))
        .join(CONFIG_FILE)
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("loom"))
        .unwrap_or_else(|| PathBuf::from(".loom"))
}
