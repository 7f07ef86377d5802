//! Prefix-scoped view of a bus.

use crate::error::BusResult;
use crate::listener::{Emission, Handler, ListenerOptions, Subscription};
use crate::EventBus;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Event bus facade that prefixes every event name with `prefix.`.
#[derive(Clone)]
pub struct Namespaced {
    bus: EventBus,
    prefix: String,
}

impl Namespaced {
    pub(crate) fn new(bus: EventBus, prefix: &str) -> Self {
        Self {
            bus,
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully-qualified name of `event` on the underlying bus.
    pub fn qualify(&self, event: &str) -> String {
        format!("{}.{}", self.prefix, event)
    }

    pub fn on<F>(&self, event: &str, f: F, options: ListenerOptions) -> Subscription
    where
        F: Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.on(&self.qualify(event), f, options)
    }

    pub fn once<F>(&self, event: &str, f: F) -> Subscription
    where
        F: Fn(&Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.once(&self.qualify(event), f)
    }

    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        self.bus.off(&self.qualify(event), handler)
    }

    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        self.bus.emit(&self.qualify(event), args)
    }

    pub fn emit_async(&self, event: &str, args: Vec<Value>) -> JoinHandle<bool> {
        self.bus.emit_async(self.qualify(event), args)
    }

    pub fn wait_for(
        &self,
        event: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = BusResult<Vec<Value>>> + Send + 'static {
        self.bus.wait_for(&self.qualify(event), timeout)
    }
}
