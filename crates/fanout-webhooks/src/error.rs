//! Error types for the webhook delivery engine.

use thiserror::Error;

/// Webhook engine error variants.
///
/// Delivery failures (non-2xx, timeout, network) are not errors here: they
/// are recorded as failed attempts and drive retry scheduling. This enum
/// covers validation and infrastructure failures only.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Endpoint is not verified for this event type")]
    VerificationRequired,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
