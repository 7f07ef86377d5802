//! Projects: the user's workspaces, each optionally tied to a knowledge base.

use crate::args::{optional, required, to_json};
use crate::events::{CHAT_OPEN, ROUTER_NAVIGATE};
use crate::notify::{NotificationKind, notify};
use crate::slice::PersistedSlice;
use loom_bus::EventBus;
use loom_plugin_host::{Plugin, PluginContext, PluginError, PluginMetadata};
use loom_state::{StateStore, paths};
use loom_storage::keys;
use loom_types::{Chat, Project, ProjectId, ProjectStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "projects";

const NO_DESCRIPTION: &str = "No description provided";

/// Fields a user supplies when creating or editing a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDraft {
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub knowledge_base: Option<String>,
    pub status: Option<ProjectStatus>,
}

impl ProjectDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    fn validated_title(&self) -> Result<String, PluginError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(PluginError::InvalidArgs("project title is required".into()));
        }
        Ok(title.to_string())
    }

    fn description(&self) -> String {
        match self.description.trim() {
            "" => NO_DESCRIPTION.to_string(),
            text => text.to_string(),
        }
    }
}

pub struct ProjectsPlugin {
    bus: EventBus,
    store: StateStore,
    slice: PersistedSlice,
}

impl ProjectsPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            slice: PersistedSlice::new(ctx.store.clone(), ctx.storage.clone(), paths::PROJECTS, keys::PROJECTS),
            bus: ctx.bus,
            store: ctx.store,
        }
    }

    pub fn factory(ctx: PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(Self::new(ctx)))
    }

    pub fn list(&self) -> Result<Vec<Project>, PluginError> {
        self.slice.items()
    }

    pub fn get(&self, id: ProjectId) -> Result<Option<Project>, PluginError> {
        Ok(self.list()?.into_iter().find(|p| p.id == id))
    }

    fn require(&self, id: ProjectId) -> Result<Project, PluginError> {
        self.get(id)?
            .ok_or_else(|| PluginError::NotFound(format!("project {id}")))
    }

    /// Creates a project at the top of the list. An empty description falls
    /// back to a placeholder and a missing knowledge base gets a generated id.
    pub fn create(&self, draft: ProjectDraft) -> Result<Project, PluginError> {
        let mut project = Project::new(draft.validated_title()?, draft.description());
        project.instructions = draft.instructions.trim().to_string();
        project.status = draft.status.unwrap_or_default();
        project.last_active = today();
        project.knowledge_base = Some(
            draft
                .knowledge_base
                .filter(|kb| !kb.trim().is_empty())
                .unwrap_or_else(|| format!("kb_{}", project.id.as_uuid().simple())),
        );

        let mut projects = self.list()?;
        projects.insert(0, project.clone());
        self.slice.replace(&projects)?;

        info!(id = %project.id, title = %project.title, "Project created");
        notify(&self.bus, "Project created successfully", NotificationKind::Success);
        Ok(project)
    }

    /// Replaces the editable fields of a project, keeping its id and creation time.
    pub fn update(&self, id: ProjectId, draft: ProjectDraft) -> Result<Project, PluginError> {
        let title = draft.validated_title()?;
        let mut projects = self.list()?;
        let project = projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PluginError::NotFound(format!("project {id}")))?;

        project.title = title;
        project.description = draft.description();
        project.instructions = draft.instructions.trim().to_string();
        if let Some(status) = draft.status {
            project.status = status;
        }
        if let Some(kb) = draft.knowledge_base.filter(|kb| !kb.trim().is_empty()) {
            project.knowledge_base = Some(kb);
        }
        project.last_active = today();
        let updated = project.clone();

        self.slice.replace(&projects)?;
        notify(&self.bus, "Project updated successfully", NotificationKind::Success);
        Ok(updated)
    }

    /// Returns `false` when no project has `id`.
    pub fn delete(&self, id: ProjectId) -> Result<bool, PluginError> {
        let mut projects = self.list()?;
        let before = projects.len();
        projects.retain(|p| p.id != id);
        if projects.len() == before {
            debug!(%id, "Delete skipped, project not found");
            return Ok(false);
        }
        self.slice.replace(&projects)?;
        notify(&self.bus, "Project deleted successfully", NotificationKind::Success);
        Ok(true)
    }

    /// Copies a project under a new id as `"<title> (Copy)"`, never opened.
    pub fn duplicate(&self, id: ProjectId) -> Result<Project, PluginError> {
        let original = self.require(id)?;
        let mut copy = Project::new(format!("{} (Copy)", original.title), original.description);
        copy.instructions = original.instructions;
        copy.status = original.status;
        copy.knowledge_base = original.knowledge_base;

        let mut projects = self.list()?;
        projects.insert(0, copy.clone());
        self.slice.replace(&projects)?;
        notify(&self.bus, "Project duplicated successfully", NotificationKind::Success);
        Ok(copy)
    }

    /// Opens a new chat bound to the project and switches to it.
    pub fn start_chat(&self, id: ProjectId) -> Result<Chat, PluginError> {
        let project = self.require(id)?;
        let mut chat = Chat::new(format!("Chat: {}", project.title), "New chat started");
        chat.project_id = Some(project.id);
        chat.knowledge_base = project.knowledge_base.clone();

        self.store
            .push(paths::CHATS, to_json(&chat)?, true)
            .map_err(anyhow::Error::from)?;
        self.touch(id)?;

        self.bus.emit(ROUTER_NAVIGATE, &[json!("active-chat")]);
        self.bus.emit(CHAT_OPEN, &[json!(chat.id)]);
        notify(
            &self.bus,
            format!("Chat started for project: {}", project.title),
            NotificationKind::Success,
        );
        Ok(chat)
    }

    fn touch(&self, id: ProjectId) -> Result<(), PluginError> {
        let mut projects = self.list()?;
        if let Some(project) = projects.iter_mut().find(|p| p.id == id) {
            project.last_active = today();
            self.slice.replace(&projects)?;
        }
        Ok(())
    }

    /// Display label for a status string; unknown values pass through.
    pub fn format_status(status: &str) -> String {
        serde_json::from_value::<ProjectStatus>(json!(status))
            .map_or_else(|_| status.to_string(), |s| s.label().to_string())
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

impl Plugin for ProjectsPlugin {
    fn metadata(&self) -> PluginMetadata {
        crate::metadata(NAME, "Project management feature")
    }

    fn init(&self) -> Result<(), PluginError> {
        self.slice.load();
        Ok(())
    }

    fn enable(&self) -> Result<(), PluginError> {
        self.slice.attach();
        Ok(())
    }

    fn disable(&self) -> Result<(), PluginError> {
        self.slice.detach();
        Ok(())
    }

    fn destroy(&self) -> Result<(), PluginError> {
        self.slice.detach();
        Ok(())
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, PluginError> {
        match method {
            "list" => to_json(&self.list()?),
            "get" => to_json(&self.get(required(args, 0, "id")?)?),
            "create" => to_json(&self.create(required(args, 0, "project")?)?),
            "update" => to_json(&self.update(required(args, 0, "id")?, required(args, 1, "project")?)?),
            "delete" => Ok(json!(self.delete(required(args, 0, "id")?)?)),
            "duplicate" => to_json(&self.duplicate(required(args, 0, "id")?)?),
            "start_chat" => to_json(&self.start_chat(required(args, 0, "id")?)?),
            "format_status" => {
                let status: Option<String> = optional(args, 0, "status")?;
                Ok(json!(Self::format_status(status.as_deref().unwrap_or_default())))
            }
            other => Err(PluginError::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(ProjectsPlugin::format_status("active"), "Active");
        assert_eq!(ProjectsPlugin::format_status("paused"), "Paused");
        assert_eq!(ProjectsPlugin::format_status("archived"), "archived");
    }

    #[test]
    fn draft_validation() {
        assert!(ProjectDraft::titled("   ").validated_title().is_err());
        let draft = ProjectDraft::titled("  Roadmap ");
        assert_eq!(draft.validated_title().unwrap(), "Roadmap");
        assert_eq!(draft.description(), NO_DESCRIPTION);
    }

    #[test]
    fn draft_reads_camel_case() {
        let draft: ProjectDraft =
            serde_json::from_value(json!({"title": "A", "knowledgeBase": "kb_1", "status": "planned"})).unwrap();
        assert_eq!(draft.knowledge_base.as_deref(), Some("kb_1"));
        assert_eq!(draft.status, Some(ProjectStatus::Planned));
    }
}
