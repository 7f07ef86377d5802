//! Toast notifications sent over the bus.

use crate::events::NOTIFICATION_SHOW;
use loom_bus::EventBus;
use serde::Serialize;
use serde_json::json;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Info,
    Warning,
    Error,
}

/// Emits `notification:show` with `{message, type}`.
pub(crate) fn notify(bus: &EventBus, message: impl Into<String>, kind: NotificationKind) {
    bus.emit(NOTIFICATION_SHOW, &[json!({ "message": message.into(), "type": kind })]);
}
