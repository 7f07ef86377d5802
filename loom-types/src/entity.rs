//! Domain entities kept in the state tree.
//!
//! Field names serialize in camelCase so persisted buckets keep the same
//! layout regardless of which version of the workspace wrote them.

use crate::{ArtifactId, ChatId, MessageId, ProjectId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Planned,
    Completed,
    Paused,
}

impl ProjectStatus {
    /// Display label for the status.
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Planned => "Planned",
            Self::Completed => "Completed",
            Self::Paused => "Paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Guidelines attached to chats started from this project.
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub status: ProjectStatus,
    /// Free-form date string, empty when the project was never opened.
    #[serde(default)]
    pub last_active: String,
    #[serde(default)]
    pub knowledge_base: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Creates an active project with a fresh id.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            title: title.into(),
            description: description.into(),
            instructions: String::new(),
            status: ProjectStatus::Active,
            last_active: String::new(),
            knowledge_base: None,
            created_at: Utc::now(),
        }
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    #[serde(default)]
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub knowledge_base: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn new(title: impl Into<String>, last_message: impl Into<String>) -> Self {
        Self {
            id: ChatId::new(),
            title: title.into(),
            last_message: last_message.into(),
            timestamp: Utc::now(),
            project_id: None,
            knowledge_base: None,
            messages: Vec::new(),
        }
    }
}

/// Content kind of an artifact. Unknown kinds read back as plain text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Html,
    Css,
    Javascript,
    Markdown,
    #[default]
    #[serde(other)]
    Text,
}

impl ArtifactType {
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Javascript => "js",
            Self::Markdown => "md",
            Self::Text => "txt",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Css => "text/css",
            Self::Javascript => "text/javascript",
            Self::Markdown => "text/markdown",
            Self::Text => "text/plain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: ArtifactId,
    pub title: String,
    #[serde(rename = "type", default)]
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub preview: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub size: String,
}

/// Decodes a JSON array of entities, as stored in the state tree.
/// A `null` value decodes to an empty list.
pub(crate) fn decode_list<T: DeserializeOwned>(value: &serde_json::Value) -> crate::Result<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value.clone())?)
}

macro_rules! list_codec {
    ($ty:ty) => {
        impl $ty {
            /// Decodes a stored list of this entity.
            pub fn list_from_value(value: &serde_json::Value) -> crate::Result<Vec<Self>> {
                decode_list(value)
            }

            /// Encodes a list of this entity for the state tree.
            pub fn list_to_value(items: &[Self]) -> crate::Result<serde_json::Value> {
                Ok(serde_json::to_value(items)?)
            }
        }
    };
}

list_codec!(Project);
list_codec!(Chat);
list_codec!(Artifact);
