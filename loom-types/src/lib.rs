//! Core type definitions for the Loom workspace.
//!
//! This crate defines the plain data shared by every other crate:
//! - Identifier newtypes for projects, chats, messages and artifacts (UUID v7)
//! - The domain entities stored in the state tree and persisted to storage
//! - Small formatting helpers used when building those entities
//!
//! Entities carry no behaviour beyond construction; the feature plugins own
//! all mutation logic.

mod entity;
mod format;
mod ids;
mod removal;

pub use entity::{Artifact, ArtifactType, Chat, Message, Project, ProjectStatus, Role};
pub use format::{format_file_size, format_time_ago, size_label, truncate_chars};
pub use ids::{ArtifactId, ChatId, MessageId, ProjectId};
pub use removal::Removal;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
