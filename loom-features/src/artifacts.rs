//! Artifacts: generated documents and the side panel that shows them.

use crate::args::{optional, required, to_json};
use crate::events::{
    ARTIFACT_CREATE, ARTIFACT_PANEL_CLOSED, ARTIFACT_PANEL_OPENED, ARTIFACT_PANEL_RESIZED, ARTIFACT_VIEW,
};
use crate::listen::Listeners;
use crate::notify::{NotificationKind, notify};
use crate::slice::{PersistedSlice, lock};
use chrono::Utc;
use loom_bus::EventBus;
use loom_plugin_host::{Plugin, PluginContext, PluginError, PluginMetadata};
use loom_state::paths;
use loom_storage::{StorageManager, keys};
use loom_types::{Artifact, ArtifactId, ArtifactType, size_label};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const NAME: &str = "artifacts";

pub const PANEL_MIN_WIDTH: u32 = 300;
pub const PANEL_MAX_WIDTH: u32 = 900;
pub const PANEL_DEFAULT_WIDTH: u32 = 500;

const UNTITLED: &str = "Untitled Artifact";

/// Fields accepted when creating an artifact. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactDraft {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub artifact_type: Option<ArtifactType>,
    pub content: Option<String>,
    pub preview: Option<String>,
}

/// Viewer panel geometry, persisted under `artifact-panel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    pub width: u32,
    #[serde(default)]
    pub is_open: bool,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            width: PANEL_DEFAULT_WIDTH,
            is_open: false,
        }
    }
}

fn clamp_width(width: u32) -> u32 {
    width.clamp(PANEL_MIN_WIDTH, PANEL_MAX_WIDTH)
}

pub struct ArtifactsPlugin {
    inner: Arc<ArtifactsInner>,
    listeners: Listeners<ArtifactsInner>,
}

struct ArtifactsInner {
    bus: EventBus,
    storage: StorageManager,
    slice: PersistedSlice,
    current: Mutex<Option<ArtifactId>>,
    last: Mutex<Option<ArtifactId>>,
    panel: Mutex<PanelState>,
}

impl ArtifactsPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        let inner = Arc::new(ArtifactsInner {
            slice: PersistedSlice::new(ctx.store.clone(), ctx.storage.clone(), paths::ARTIFACTS, keys::ARTIFACTS),
            bus: ctx.bus,
            storage: ctx.storage,
            current: Mutex::new(None),
            last: Mutex::new(None),
            panel: Mutex::new(PanelState::default()),
        });
        Self {
            listeners: Listeners::new(&inner),
            inner,
        }
    }

    pub fn factory(ctx: PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(Self::new(ctx)))
    }

    pub fn list(&self) -> Result<Vec<Artifact>, PluginError> {
        self.inner.list()
    }

    pub fn get(&self, id: ArtifactId) -> Result<Option<Artifact>, PluginError> {
        self.inner.find(id)
    }

    /// Stores a new artifact at the top of the list and opens it.
    pub fn create(&self, draft: ArtifactDraft) -> Result<Artifact, PluginError> {
        self.inner.create(draft)
    }

    /// Opens the panel on `id`. An unknown id raises an error notification.
    pub fn view(&self, id: ArtifactId) -> Result<Artifact, PluginError> {
        self.inner.view(id)
    }

    /// Reopens the most recently viewed artifact, if any.
    pub fn view_last(&self) -> Result<Option<Artifact>, PluginError> {
        let last = *lock(&self.inner.last);
        match last {
            Some(id) => self.inner.view(id).map(Some),
            None => {
                notify(&self.inner.bus, "No recent artifacts to display", NotificationKind::Info);
                Ok(None)
            }
        }
    }

    pub fn close(&self) {
        self.inner.close();
    }

    /// Sets the panel width, clamped to the allowed range. Returns the applied width.
    pub fn resize(&self, width: u32) -> u32 {
        let width = clamp_width(width);
        let state = {
            let mut panel = lock(&self.inner.panel);
            panel.width = width;
            *panel
        };
        self.inner.save_panel(state);
        self.inner.bus.emit(ARTIFACT_PANEL_RESIZED, &[json!({ "width": width })]);
        width
    }

    pub fn panel(&self) -> PanelState {
        *lock(&self.inner.panel)
    }

    pub fn current(&self) -> Result<Option<Artifact>, PluginError> {
        let current = *lock(&self.inner.current);
        match current {
            Some(id) => self.inner.find(id),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: ArtifactId) -> Result<bool, PluginError> {
        let mut artifacts = self.inner.list()?;
        let before = artifacts.len();
        artifacts.retain(|a| a.id != id);
        if artifacts.len() == before {
            return Ok(false);
        }
        self.inner.slice.replace(&artifacts)?;

        if *lock(&self.inner.current) == Some(id) {
            self.inner.close();
        }
        let mut last = lock(&self.inner.last);
        if *last == Some(id) {
            *last = None;
        }
        drop(last);
        notify(&self.inner.bus, "Artifact deleted successfully", NotificationKind::Success);
        Ok(true)
    }

    pub fn file_extension(artifact_type: ArtifactType) -> &'static str {
        artifact_type.file_extension()
    }

    pub fn mime_type(artifact_type: ArtifactType) -> &'static str {
        artifact_type.mime_type()
    }

    pub fn calculate_size(content: &str) -> String {
        size_label(content)
    }

    /// File name offered when downloading: the title with every character
    /// outside `[A-Za-z0-9]` replaced by `_`, plus the type's extension.
    pub fn download_name(artifact: &Artifact) -> String {
        let stem: String = artifact
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{stem}.{}", artifact.artifact_type.file_extension())
    }

    fn subscribe_bus(&self) {
        let bus = &self.inner.bus;
        self.listeners.on(bus, ARTIFACT_VIEW, |inner: &ArtifactsInner, emission| {
            let id: ArtifactId = serde_json::from_value(emission.arg(0).clone())?;
            inner.view(id)?;
            Ok(())
        });
        self.listeners.on(bus, ARTIFACT_CREATE, |inner: &ArtifactsInner, emission| {
            let draft: ArtifactDraft = match emission.arg(0) {
                Value::Null => ArtifactDraft::default(),
                value => serde_json::from_value(value.clone())?,
            };
            inner.create(draft)?;
            Ok(())
        });
    }
}

impl ArtifactsInner {
    fn list(&self) -> Result<Vec<Artifact>, PluginError> {
        self.slice.items()
    }

    fn find(&self, id: ArtifactId) -> Result<Option<Artifact>, PluginError> {
        Ok(self.list()?.into_iter().find(|a| a.id == id))
    }

    fn create(&self, draft: ArtifactDraft) -> Result<Artifact, PluginError> {
        let content = draft.content.unwrap_or_default();
        let artifact = Artifact {
            id: ArtifactId::new(),
            title: draft
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string()),
            artifact_type: draft.artifact_type.unwrap_or_default(),
            size: size_label(&content),
            preview: draft.preview.unwrap_or_default(),
            content,
            created_at: Utc::now(),
        };

        let mut artifacts = self.list()?;
        artifacts.insert(0, artifact.clone());
        self.slice.replace(&artifacts)?;
        info!(id = %artifact.id, kind = ?artifact.artifact_type, "Artifact created");

        self.view(artifact.id)?;
        notify(&self.bus, "Artifact created successfully", NotificationKind::Success);
        Ok(artifact)
    }

    fn view(&self, id: ArtifactId) -> Result<Artifact, PluginError> {
        let Some(artifact) = self.find(id)? else {
            notify(&self.bus, "Artifact not found", NotificationKind::Error);
            return Err(PluginError::NotFound(format!("artifact {id}")));
        };
        *lock(&self.current) = Some(id);
        *lock(&self.last) = Some(id);
        self.open_panel();
        debug!(%id, "Artifact opened");
        Ok(artifact)
    }

    fn open_panel(&self) {
        let state = {
            let mut panel = lock(&self.panel);
            panel.is_open = true;
            *panel
        };
        self.save_panel(state);
        self.bus.emit(ARTIFACT_PANEL_OPENED, &[]);
    }

    fn close(&self) {
        *lock(&self.current) = None;
        let state = {
            let mut panel = lock(&self.panel);
            if !panel.is_open {
                return;
            }
            panel.is_open = false;
            *panel
        };
        self.save_panel(state);
        self.bus.emit(ARTIFACT_PANEL_CLOSED, &[]);
    }

    fn load_panel(&self) {
        let state = match self.storage.get(keys::ARTIFACT_PANEL) {
            None => PanelState::default(),
            Some(value) => match serde_json::from_value::<PanelState>(value) {
                Ok(state) => PanelState {
                    width: clamp_width(state.width),
                    is_open: state.is_open,
                },
                Err(e) => {
                    warn!(error = %e, "Stored panel state is invalid, using defaults");
                    PanelState::default()
                }
            },
        };
        *lock(&self.panel) = state;
    }

    fn save_panel(&self, state: PanelState) {
        if !self.storage.set_as(keys::ARTIFACT_PANEL, &state) {
            warn!("Failed to persist artifact panel state");
        }
    }
}

impl Plugin for ArtifactsPlugin {
    fn metadata(&self) -> PluginMetadata {
        crate::metadata(NAME, "Enhanced artifact management with resizable viewer")
    }

    fn init(&self) -> Result<(), PluginError> {
        self.inner.slice.load();
        self.inner.load_panel();
        Ok(())
    }

    fn enable(&self) -> Result<(), PluginError> {
        self.inner.slice.attach();
        self.subscribe_bus();
        Ok(())
    }

    fn disable(&self) -> Result<(), PluginError> {
        self.listeners.clear();
        self.inner.slice.detach();
        Ok(())
    }

    fn destroy(&self) -> Result<(), PluginError> {
        self.listeners.clear();
        self.inner.slice.detach();
        self.inner.close();
        Ok(())
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, PluginError> {
        match method {
            "list" => to_json(&self.list()?),
            "get" => to_json(&self.get(required(args, 0, "id")?)?),
            "current" => to_json(&self.current()?),
            "create" => {
                let draft: Option<ArtifactDraft> = optional(args, 0, "artifact")?;
                to_json(&self.create(draft.unwrap_or_default())?)
            }
            "view" => to_json(&self.view(required(args, 0, "id")?)?),
            "view_last" => to_json(&self.view_last()?),
            "close" => {
                self.close();
                Ok(Value::Null)
            }
            "resize" => Ok(json!(self.resize(required(args, 0, "width")?))),
            "panel" => to_json(&self.panel()),
            "delete" => Ok(json!(self.delete(required(args, 0, "id")?)?)),
            "file_extension" => Ok(json!(Self::file_extension(required(args, 0, "type")?))),
            "mime_type" => Ok(json!(Self::mime_type(required(args, 0, "type")?))),
            "calculate_size" => {
                let content: String = required(args, 0, "content")?;
                Ok(json!(Self::calculate_size(&content)))
            }
            "download_name" => {
                let artifact = self
                    .get(required(args, 0, "id")?)?
                    .ok_or_else(|| PluginError::NotFound("artifact".into()))?;
                Ok(json!(Self::download_name(&artifact)))
            }
            other => Err(PluginError::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_name_sanitizes_title() {
        let mut artifact = Artifact {
            id: ArtifactId::new(),
            title: "Q3 Report: final!".into(),
            artifact_type: ArtifactType::Markdown,
            content: String::new(),
            preview: String::new(),
            created_at: Utc::now(),
            size: String::new(),
        };
        assert_eq!(ArtifactsPlugin::download_name(&artifact), "Q3_Report__final_.md");
        artifact.artifact_type = ArtifactType::Javascript;
        artifact.title = "app".into();
        assert_eq!(ArtifactsPlugin::download_name(&artifact), "app.js");
    }

    #[test]
    fn widths_are_clamped() {
        assert_eq!(clamp_width(10), PANEL_MIN_WIDTH);
        assert_eq!(clamp_width(650), 650);
        assert_eq!(clamp_width(5000), PANEL_MAX_WIDTH);
    }

    #[test]
    fn panel_state_uses_camel_case() {
        let value = serde_json::to_value(PanelState { width: 420, is_open: true }).unwrap();
        assert_eq!(value, json!({"width": 420, "isOpen": true}));
    }

    #[test]
    fn draft_reads_type_field() {
        let draft: ArtifactDraft = serde_json::from_value(json!({"title": "Page", "type": "html"})).unwrap();
        assert_eq!(draft.artifact_type, Some(ArtifactType::Html));
        assert_eq!(draft.content, None);
    }
}
