//! Observable state tree for the Loom workspace.
//!
//! All UI-relevant data lives in one JSON tree owned by a [`StateStore`].
//! Values are addressed by dot-separated paths (`"app.theme"`,
//! `"projects.0.title"`) and every mutation goes through the store so that
//! subscribers can be notified.
//!
//! # Change detection
//!
//! A `set` notifies when the new value differs from the old one by identity:
//! primitives compare by value, while objects and arrays are always treated
//! as fresh values. Replacing a list with an equal copy therefore notifies,
//! which is what `push`/`remove` rely on.
//!
//! # Subscriptions
//!
//! - exact: `"app.theme"`
//! - wildcard: `"app.*"` fires for any change at or below `app`
//! - global: `"*"` fires for every change
//!
//! Listeners may call back into the store; no lock is held while they run.

mod defaults;
mod error;
pub mod paths;
mod store;
mod tree;

pub use defaults::default_tree;
pub use error::{StateError, StateResult};
pub use loom_types::Removal;
pub use store::{Change, Computed, StateHandler, StateStore, StateSubscription};
pub use tree::deep_merge;
