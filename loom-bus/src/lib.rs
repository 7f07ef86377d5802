//! In-process event bus for the Loom workspace.
//!
//! Components never call each other directly; they emit named events onto a
//! shared [`EventBus`] and subscribe to the events they care about.
//!
//! # Matching
//!
//! Event names are dot-delimited topics (`"chat.message.sent"`). An emission
//! is delivered, in order, to:
//! 1. listeners on the exact name, highest priority first
//! 2. wildcard listeners on each prefix (`"chat.message.*"`, then `"chat.*"`)
//! 3. global listeners registered on `"*"`
//!
//! A failing or panicking listener is logged and skipped; it never prevents
//! delivery to the remaining listeners.
//!
//! # Example
//!
//! ```
//! use loom_bus::{EventBus, ListenerOptions};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//! bus.on("project:created", |e| {
//!     println!("created {}", e.args[0]);
//!     Ok(())
//! }, ListenerOptions::default());
//!
//! assert!(bus.emit("project:created", &[json!("Website Redesign")]));
//! ```

mod bus;
mod error;
mod listener;
mod namespace;

pub use bus::{EmitContext, EventBus, Middleware, PipeSelector, DEFAULT_MAX_LISTENERS};
pub use error::{BusError, BusResult};
pub use listener::{handler, Emission, Handler, ListenerOptions, Subscription};
pub use namespace::Namespaced;
