//! Error types for the dispatch orchestrator.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use fanout_actions::ActionError;
use fanout_core::CoreError;
use fanout_webhooks::WebhookError;

/// Orchestrator error variants.
///
/// Delivery and action failures never surface here; they are recorded on
/// their attempt/execution rows. What does surface is what the caller of
/// the dispatch loop must react to: validation rejects and store failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation failed: {0}")]
    Validation(#[from] CoreError),

    #[error("An event with this id already exists")]
    DuplicateEvent,

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Configuration missing: {var}")]
    ConfigMissing { var: String },

    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },
}

impl DispatchError {
    /// Returns true for errors where backing off and retrying the whole
    /// batch is the right reaction (store unreachable and the like).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::Database(_)
                | DispatchError::Webhook(WebhookError::Database(_))
                | DispatchError::Action(ActionError::Database(_))
        )
    }
}

/// JSON error body returned by the admin router.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            DispatchError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            DispatchError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            DispatchError::DuplicateEvent => (StatusCode::CONFLICT, "duplicate_event"),
            DispatchError::EndpointNotFound => (StatusCode::NOT_FOUND, "endpoint_not_found"),
            DispatchError::SubscriptionNotFound => {
                (StatusCode::NOT_FOUND, "subscription_not_found")
            }
            DispatchError::Webhook(WebhookError::Database(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
            DispatchError::Webhook(_) => (StatusCode::BAD_REQUEST, "webhook_error"),
            DispatchError::Action(_) => (StatusCode::INTERNAL_SERVER_ERROR, "action_error"),
            DispatchError::ConfigMissing { .. } | DispatchError::ConfigInvalid { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}
