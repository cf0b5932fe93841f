//! Error types for the action subsystem.

use thiserror::Error;

use crate::handlers::HandlerError;

/// Action registry and executor errors.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No handler implementation registered for the action's handler type.
    /// The offending action is disabled rather than aborting the batch.
    #[error("No handler registered for type '{0}'")]
    UnknownHandler(String),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Invalid action configuration: {0}")]
    Configuration(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),
}
