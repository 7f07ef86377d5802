//! Listener handles and options.

use crate::bus::Inner;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

/// A single delivery of an event to a listener.
///
/// `event` is always the concrete emitted name, also for wildcard and global
/// listeners.
#[derive(Debug, Clone, Copy)]
pub struct Emission<'a> {
    pub event: &'a str,
    pub args: &'a [Value],
}

impl Emission<'_> {
    /// Returns the argument at `index`, or `Value::Null` when absent.
    pub fn arg(&self, index: usize) -> &Value {
        self.args.get(index).unwrap_or(&Value::Null)
    }
}

/// Shared listener callback. Identity (for [`crate::EventBus::off`]) is the
/// `Arc` allocation.
pub type Handler = Arc<dyn Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure into a [`Handler`] so it can later be passed to `off`.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Options accepted by [`crate::EventBus::on`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Remove the listener after its first delivery.
    pub once: bool,
    /// Higher priorities fire first. Ties keep registration order.
    pub priority: i32,
}

impl ListenerOptions {
    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }

    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

pub(crate) struct Listener {
    pub(crate) id: u64,
    pub(crate) handler: Handler,
    pub(crate) once: bool,
    pub(crate) priority: i32,
}

/// Handle returned by `on`; call [`Subscription::unsubscribe`] to remove the
/// listener. Dropping the handle leaves the listener registered.
pub struct Subscription {
    pub(crate) bus: Weak<Inner>,
    pub(crate) event: String,
    pub(crate) id: u64,
}

impl Subscription {
    /// Event name this subscription listens on.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Removes the listener. Returns `false` if it was already gone
    /// (fired as `once`, removed by `off`, or the bus was dropped).
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove_listener(&self.event, self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}
