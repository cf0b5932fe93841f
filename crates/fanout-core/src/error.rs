//! Error types for the fanout-core crate.

use thiserror::Error;

/// Errors from matching primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event type does not follow the `category.action` naming convention.
    #[error("Invalid event type '{event_type}': must match category.action (lowercase, underscores)")]
    InvalidEventType { event_type: String },

    /// A filter condition could not be parsed.
    #[error("Invalid condition: {reason}")]
    InvalidCondition { reason: String },
}
