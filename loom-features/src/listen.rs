//! Weakly held bus subscriptions for plugins.

use crate::slice::lock;
use loom_bus::{Emission, EventBus, ListenerOptions, Subscription};
use std::sync::{Arc, Mutex, Weak};

/// Bus subscriptions a plugin holds while it is enabled.
pub(crate) struct Listeners<T> {
    target: Weak<T>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T: Send + Sync + 'static> Listeners<T> {
    pub(crate) fn new(target: &Arc<T>) -> Self {
        Self {
            target: Arc::downgrade(target),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Registers `f` on `event`. The listener goes quiet once the target is dropped.
    pub(crate) fn on<F>(&self, bus: &EventBus, event: &str, f: F)
    where
        F: Fn(&T, &Emission<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let target = self.target.clone();
        let subscription = bus.on(
            event,
            move |emission| match target.upgrade() {
                Some(inner) => f(&inner, emission),
                None => Ok(()),
            },
            ListenerOptions::default(),
        );
        lock(&self.subscriptions).push(subscription);
    }

    pub(crate) fn clear(&self) {
        let subscriptions: Vec<Subscription> = lock(&self.subscriptions).drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}
