//! Error types for the event bus.

use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    /// `wait_for` gave up before the event fired.
    #[error("timeout waiting for event: {event} ({timeout_ms}ms)")]
    Timeout { event: String, timeout_ms: u64 },

    /// The pending listener was removed before the event fired.
    #[error("listener for event '{0}' was removed before it fired")]
    Closed(String),
}
