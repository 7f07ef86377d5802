//! Loom workspace application layer.
//!
//! [`LoomApp`] wires the event bus, state store, storage and plugin host
//! together, restores persisted settings, boots the feature plugins and
//! drives the section [`Router`]. The `loom` binary is a thin command-line
//! front end over it.

pub mod app;
pub mod config;
pub mod error;
pub mod router;

pub use app::LoomApp;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use router::{CurrentRoute, Location, Route, Router};
