//! # fanout-webhooks
//!
//! Webhook delivery engine for the fanout event platform.
//!
//! Responsibilities:
//!
//! - Matching events to active subscriptions (subscription index)
//! - Executing HTTP delivery attempts with HMAC-SHA256 signatures
//! - Retry scheduling with exponential backoff and a delay cap
//! - Per-endpoint circuit breaking against consistently failing targets
//! - URL validation with SSRF protection for endpoint registration
//!
//! Delivery is at-least-once: receivers must be idempotent.

pub mod circuit_breaker;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod services;
pub mod validation;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use envelope::DeliveryEnvelope;
pub use error::WebhookError;
pub use services::delivery_service::{
    retry_delay, DeliveryOutcomeKind, DeliveryService, RETRY_DELAY_CAP_SECS,
};
pub use services::subscription_index::SubscriptionIndex;
