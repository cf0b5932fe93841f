//! Webhook delivery execution service.
//!
//! Owns the per-attempt work: building the signed HTTP request, sending it
//! with the endpoint's timeout, recording the attempt, and driving the
//! delivery state machine (success, exponential-backoff retry, exhaustion,
//! cancellation). Integrates the per-endpoint circuit breaker so attempts
//! against a known-dead endpoint are fast-failed without an outbound call.

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use sqlx::PgPool;
use uuid::Uuid;

use fanout_db::models::{
    CreateDeliveryAttempt, CreateWebhookDelivery, DomainEvent, SubscriptionMatch, WebhookDelivery,
    WebhookEndpoint, WebhookSubscription,
};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, FailureRecord};
use crate::crypto;
use crate::envelope::DeliveryEnvelope;
use crate::error::WebhookError;

/// Retry delays never exceed this cap.
pub const RETRY_DELAY_CAP_SECS: i64 = 3600;

/// Default consecutive failure threshold before auto-deactivating an
/// endpoint.
pub const DEFAULT_DISABLE_THRESHOLD: i32 = 50;

/// Recorded response bodies are truncated to this length.
const RESPONSE_BODY_LIMIT: usize = 4096;

/// Retry delay in seconds for the given failed attempt number (1-based):
/// `min(base * multiplier^(attempt-1), cap)`.
#[must_use]
pub fn retry_delay(base_backoff_secs: i32, multiplier: f64, attempt: i32) -> i64 {
    let base = f64::from(base_backoff_secs.max(0));
    let exponent = (attempt - 1).max(0);
    let delay = base * multiplier.max(1.0).powi(exponent);

    if !delay.is_finite() || delay >= RETRY_DELAY_CAP_SECS as f64 {
        RETRY_DELAY_CAP_SECS
    } else {
        delay.ceil() as i64
    }
}

/// How one delivery execution concluded, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcomeKind {
    /// 2xx response received.
    Success,
    /// Outbound call made and failed (non-2xx, timeout, network).
    Failed,
    /// Skipped without an outbound call because the circuit was open.
    FastFailed,
    /// Nothing executed (terminal delivery, inactive endpoint).
    Skipped,
}

/// Outcome of one HTTP attempt, before persistence.
#[derive(Debug)]
struct AttemptOutcome {
    response_status: Option<i16>,
    response_body: Option<String>,
    duration_ms: i32,
    error: Option<String>,
}

impl AttemptOutcome {
    fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .response_status
                .is_some_and(|s| (200..300).contains(&(s as u16)))
    }
}

/// Service for webhook delivery operations.
#[derive(Clone)]
pub struct DeliveryService {
    pool: PgPool,
    http_client: Client,
    encryption_key: Vec<u8>,
    breakers: CircuitBreakerRegistry,
    disable_threshold: i32,
}

impl DeliveryService {
    /// Create a new delivery service with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(pool: PgPool, encryption_key: Vec<u8>) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .user_agent("fanout-webhooks/0.3")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            pool,
            http_client,
            encryption_key,
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
        })
    }

    /// Override the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = CircuitBreakerRegistry::new(config);
        self
    }

    /// Override the consecutive-failure threshold for endpoint
    /// auto-deactivation.
    #[must_use]
    pub fn with_disable_threshold(mut self, threshold: i32) -> Self {
        self.disable_threshold = threshold;
        self
    }

    /// The circuit breaker registry, for status surfaces.
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create pending deliveries for an event's matched subscriptions and
    /// attempt each immediately. Returns per-endpoint outcomes for
    /// monitoring.
    ///
    /// Delivery records are created before the caller marks the event
    /// processed; failures here are logged, never propagated, so one dead
    /// endpoint cannot stall the batch.
    pub async fn deliver_event(
        &self,
        event: &DomainEvent,
        matches: &[SubscriptionMatch],
    ) -> Vec<(Uuid, DeliveryOutcomeKind)> {
        let mut outcomes = Vec::with_capacity(matches.len());
        if matches.is_empty() {
            return outcomes;
        }

        let envelope = DeliveryEnvelope::from_event(event);

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            subscription_count = matches.len(),
            "Delivering event to matching subscriptions"
        );

        for sub in matches {
            let endpoint = match WebhookEndpoint::find_by_id(
                &self.pool,
                sub.tenant_id,
                sub.endpoint_id,
            )
            .await
            {
                Ok(Some(ep)) if ep.active => ep,
                Ok(_) => {
                    tracing::debug!(
                        target: "webhook_delivery",
                        subscription_id = %sub.id,
                        endpoint_id = %sub.endpoint_id,
                        "Skipping inactive or missing endpoint"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        endpoint_id = %sub.endpoint_id,
                        error = %e,
                        "Failed to load endpoint"
                    );
                    continue;
                }
            };

            let delivery = match WebhookDelivery::create(
                &self.pool,
                CreateWebhookDelivery {
                    tenant_id: endpoint.tenant_id,
                    endpoint_id: endpoint.id,
                    event_id: event.id,
                    max_attempts: endpoint.max_attempts,
                    base_backoff_secs: endpoint.base_backoff_secs,
                    backoff_multiplier: endpoint.backoff_multiplier,
                },
            )
            .await
            {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        endpoint_id = %endpoint.id,
                        event_id = %event.id,
                        error = %e,
                        "Failed to create delivery record"
                    );
                    continue;
                }
            };

            let outcome = self.execute_delivery(&delivery, &endpoint, &envelope).await;
            outcomes.push((endpoint.id, outcome));
        }

        outcomes
    }

    /// Execute one delivery attempt.
    pub async fn execute_delivery(
        &self,
        delivery: &WebhookDelivery,
        endpoint: &WebhookEndpoint,
        envelope: &DeliveryEnvelope,
    ) -> DeliveryOutcomeKind {
        if delivery.status.is_terminal() {
            return DeliveryOutcomeKind::Skipped;
        }

        if !endpoint.active {
            let _ = WebhookDelivery::cancel(&self.pool, delivery.id, "Endpoint deactivated").await;
            return DeliveryOutcomeKind::Skipped;
        }

        let attempt_number = delivery.attempt_count + 1;

        // Circuit breaker gate: skip the outbound call entirely while open.
        if !self.breakers.can_execute(endpoint.id).await {
            tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                "Delivery fast-failed - circuit breaker is open"
            );
            let outcome = AttemptOutcome {
                response_status: None,
                response_body: None,
                duration_ms: 0,
                error: Some("Circuit breaker open - endpoint temporarily unavailable".to_string()),
            };
            self.handle_failure(
                delivery,
                endpoint,
                attempt_number,
                serde_json::json!({}),
                &outcome,
                false,
            )
            .await;
            return DeliveryOutcomeKind::FastFailed;
        }

        let body = match envelope.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to serialize delivery envelope"
                );
                return DeliveryOutcomeKind::Skipped;
            }
        };

        let headers = self.build_headers(delivery, endpoint, envelope, &body);
        let headers_snapshot = serde_json::to_value(headers_to_map(&headers)).unwrap_or_default();

        let outcome = self.send_request(endpoint, headers, body).await;

        if outcome.is_success() {
            self.handle_success(delivery, endpoint, attempt_number, headers_snapshot, &outcome)
                .await;
            DeliveryOutcomeKind::Success
        } else {
            self.handle_failure(
                delivery,
                endpoint,
                attempt_number,
                headers_snapshot,
                &outcome,
                true,
            )
            .await;
            DeliveryOutcomeKind::Failed
        }
    }

    /// Claim due retries and re-execute them. Returns the number processed.
    pub async fn process_due_retries(&self, limit: i64) -> Result<usize, WebhookError> {
        let due = WebhookDelivery::claim_due_retries(&self.pool, limit).await?;
        let count = due.len();

        for delivery in due {
            let endpoint = match WebhookEndpoint::find_by_id(
                &self.pool,
                delivery.tenant_id,
                delivery.endpoint_id,
            )
            .await
            {
                Ok(Some(ep)) if ep.active => ep,
                Ok(_) => {
                    // Endpoint removed or deactivated since scheduling.
                    let _ = WebhookDelivery::cancel(
                        &self.pool,
                        delivery.id,
                        "Endpoint deactivated",
                    )
                    .await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Failed to load endpoint for retry"
                    );
                    continue;
                }
            };

            let Some(event) = DomainEvent::find_by_id(&self.pool, delivery.event_id).await? else {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    event_id = %delivery.event_id,
                    "Event missing for scheduled retry; cancelling delivery"
                );
                let _ =
                    WebhookDelivery::cancel(&self.pool, delivery.id, "Source event missing").await;
                continue;
            };

            let envelope = DeliveryEnvelope::from_event(&event);
            self.execute_delivery(&delivery, &endpoint, &envelope).await;
        }

        Ok(count)
    }

    /// Cancel a delivery from any non-terminal state.
    pub async fn cancel_delivery(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        reason: &str,
    ) -> Result<(), WebhookError> {
        let delivery = WebhookDelivery::find_by_id(&self.pool, tenant_id, delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound)?;

        if delivery.status.is_terminal() {
            return Err(WebhookError::Validation(format!(
                "Delivery is already terminal ({})",
                delivery.status
            )));
        }

        WebhookDelivery::cancel(&self.pool, delivery_id, reason).await?;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery_id,
            reason,
            "Delivery cancelled"
        );

        Ok(())
    }

    /// Build the outgoing header set: endpoint custom headers first, then
    /// system-reserved headers, which take precedence on name collisions.
    fn build_headers(
        &self,
        delivery: &WebhookDelivery,
        endpoint: &WebhookEndpoint,
        envelope: &DeliveryEnvelope,
        body: &[u8],
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(custom) = endpoint.custom_headers.as_object() {
            for (name, value) in custom {
                let Some(value) = value.as_str() else { continue };
                if let (Ok(n), Ok(v)) = (
                    reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                    value.parse(),
                ) {
                    headers.insert(n, v);
                }
            }
        }

        // System-reserved headers override any custom header of the same name.
        if let Ok(v) = "application/json".parse() {
            headers.insert("Content-Type", v);
        }
        if let Ok(v) = envelope.event_id.to_string().parse() {
            headers.insert("X-Fanout-Event-Id", v);
        }
        if let Ok(v) = envelope.event_type.parse() {
            headers.insert("X-Fanout-Event-Type", v);
        }
        if let Ok(v) = Utc::now().timestamp().to_string().parse() {
            headers.insert("X-Fanout-Timestamp", v);
        }
        if let Ok(v) = delivery.id.to_string().parse() {
            headers.insert("X-Fanout-Delivery-Id", v);
        }
        if let Ok(v) = delivery.tenant_id.to_string().parse() {
            headers.insert("X-Fanout-Tenant-Id", v);
        }

        if let Some(ref secret_encrypted) = endpoint.secret_encrypted {
            match crypto::decrypt_secret(secret_encrypted, &self.encryption_key) {
                Ok(secret) => {
                    let value = crypto::signature_header_value(&secret, body);
                    if let (Ok(n), Ok(v)) = (
                        reqwest::header::HeaderName::from_bytes(
                            endpoint.signature_header.as_bytes(),
                        ),
                        value.parse(),
                    ) {
                        headers.insert(n, v);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Failed to decrypt endpoint secret; delivering unsigned"
                    );
                }
            }
        }

        headers
    }

    /// Send the HTTP request and capture its outcome. Never fails: network
    /// and timeout errors become failed outcomes.
    async fn send_request(
        &self,
        endpoint: &WebhookEndpoint,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> AttemptOutcome {
        let method = Method::from_bytes(endpoint.http_method.as_bytes())
            .unwrap_or(Method::POST);
        let timeout = Duration::from_secs(endpoint.timeout_secs.max(1) as u64);

        let start = Instant::now();
        let result = self
            .http_client
            .request(method, &endpoint.url)
            .headers(headers)
            .timeout(timeout)
            .body(body)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as i32;

        match result {
            Ok(response) => {
                let status = response.status().as_u16() as i16;
                let body = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(RESPONSE_BODY_LIMIT)
                    .collect::<String>();

                let error = if (200..300).contains(&(status as u16)) {
                    None
                } else {
                    Some(format!("HTTP {status}"))
                };

                AttemptOutcome {
                    response_status: Some(status),
                    response_body: Some(body),
                    duration_ms,
                    error,
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("Request timeout ({}s)", endpoint.timeout_secs)
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };

                AttemptOutcome {
                    response_status: None,
                    response_body: None,
                    duration_ms,
                    error: Some(error),
                }
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &WebhookDelivery,
        endpoint: &WebhookEndpoint,
        attempt_number: i32,
        request_headers: serde_json::Value,
        outcome: &AttemptOutcome,
    ) {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint.id,
            event_id = %delivery.event_id,
            response_status = outcome.response_status,
            duration_ms = outcome.duration_ms,
            attempt_number,
            "Webhook delivery succeeded"
        );

        self.record_attempt(delivery, attempt_number, request_headers, outcome, endpoint)
            .await;

        if let Err(e) = WebhookDelivery::mark_success(&self.pool, delivery.id).await {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to mark delivery success"
            );
        }

        self.breakers.record_success(endpoint.id).await;

        if let Err(e) = WebhookEndpoint::reset_consecutive_failures(&self.pool, endpoint.id).await {
            tracing::error!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to reset consecutive failures"
            );
        }
    }

    async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        endpoint: &WebhookEndpoint,
        attempt_number: i32,
        request_headers: serde_json::Value,
        outcome: &AttemptOutcome,
        outbound_call_made: bool,
    ) {
        let error_msg = outcome.error.as_deref().unwrap_or("Delivery failed");
        let exhausted = attempt_number >= delivery.max_attempts;

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint.id,
            event_id = %delivery.event_id,
            error = error_msg,
            response_status = outcome.response_status,
            attempt_number,
            max_attempts = delivery.max_attempts,
            exhausted,
            "Webhook delivery failed"
        );

        self.record_attempt(delivery, attempt_number, request_headers, outcome, endpoint)
            .await;

        // Fast-fails while the circuit is open do not feed the breaker; only
        // real outbound outcomes move its state.
        if outbound_call_made {
            self.breakers
                .record_failure(
                    endpoint.id,
                    FailureRecord::new(error_msg.to_string(), outcome.response_status),
                )
                .await;
        }

        let transition = if exhausted {
            WebhookDelivery::mark_exhausted(&self.pool, delivery.id, error_msg).await
        } else {
            let delay = retry_delay(
                delivery.base_backoff_secs,
                delivery.backoff_multiplier,
                attempt_number,
            );
            let next_retry_at = Utc::now() + chrono::Duration::seconds(delay);
            WebhookDelivery::schedule_retry(&self.pool, delivery.id, next_retry_at, error_msg)
                .await
        };

        if let Err(e) = transition {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to update delivery status after failure"
            );
        }

        if outbound_call_made {
            self.track_consecutive_failures(endpoint).await;
        }
    }

    async fn record_attempt(
        &self,
        delivery: &WebhookDelivery,
        attempt_number: i32,
        request_headers: serde_json::Value,
        outcome: &AttemptOutcome,
        endpoint: &WebhookEndpoint,
    ) {
        let result = WebhookDelivery::record_attempt(
            &self.pool,
            CreateDeliveryAttempt {
                delivery_id: delivery.id,
                attempt_number,
                request_url: endpoint.url.clone(),
                request_headers,
                response_status: outcome.response_status,
                response_body: outcome.response_body.clone(),
                duration_ms: outcome.duration_ms,
                error: outcome.error.clone(),
            },
        )
        .await;

        if let Err(e) = result {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to record delivery attempt"
            );
        }
    }

    /// Bump the endpoint's consecutive-failure counter and auto-deactivate
    /// it past the threshold, cancelling its in-flight work.
    async fn track_consecutive_failures(&self, endpoint: &WebhookEndpoint) {
        let failures =
            match WebhookEndpoint::increment_consecutive_failures(&self.pool, endpoint.id).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Failed to increment consecutive failures"
                    );
                    return;
                }
            };

        if failures < self.disable_threshold {
            return;
        }

        tracing::warn!(
            target: "webhook_delivery",
            endpoint_id = %endpoint.id,
            tenant_id = %endpoint.tenant_id,
            consecutive_failures = failures,
            threshold = self.disable_threshold,
            "Auto-deactivating endpoint after consecutive failures"
        );

        if let Err(e) =
            WebhookEndpoint::deactivate(&self.pool, endpoint.tenant_id, endpoint.id).await
        {
            tracing::error!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to auto-deactivate endpoint"
            );
            return;
        }

        if let Err(e) = WebhookSubscription::deactivate_for_endpoint(&self.pool, endpoint.id).await
        {
            tracing::error!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to deactivate subscriptions for endpoint"
            );
        }

        if let Err(e) = WebhookDelivery::cancel_for_endpoint(
            &self.pool,
            endpoint.id,
            "Endpoint auto-deactivated after consecutive failures",
        )
        .await
        {
            tracing::error!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to cancel pending deliveries for endpoint"
            );
        }
    }
}

/// Convert a reqwest `HeaderMap` to a JSON-serializable map for the attempt
/// snapshot.
fn headers_to_map(headers: &HeaderMap) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.insert(name.to_string(), serde_json::Value::String(v.to_string()));
        }
    }
    map
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_exponential() {
        // base=2, multiplier=2.0: 2, 4, 8, 16
        assert_eq!(retry_delay(2, 2.0, 1), 2);
        assert_eq!(retry_delay(2, 2.0, 2), 4);
        assert_eq!(retry_delay(2, 2.0, 3), 8);
        assert_eq!(retry_delay(2, 2.0, 4), 16);
    }

    #[test]
    fn test_retry_delay_capped_at_one_hour() {
        assert_eq!(retry_delay(60, 10.0, 10), RETRY_DELAY_CAP_SECS);
        assert_eq!(retry_delay(i32::MAX, 100.0, 50), RETRY_DELAY_CAP_SECS);
    }

    #[test]
    fn test_retry_delay_monotonically_non_decreasing() {
        let mut last = 0;
        for attempt in 1..30 {
            let delay = retry_delay(2, 2.0, attempt);
            assert!(delay >= last, "delay must not decrease (attempt {attempt})");
            last = delay;
        }
    }

    #[test]
    fn test_retry_delay_multiplier_below_one_clamped() {
        // A misconfigured multiplier < 1 must not shrink delays.
        assert_eq!(retry_delay(10, 0.5, 1), 10);
        assert_eq!(retry_delay(10, 0.5, 5), 10);
    }

    #[test]
    fn test_retry_delay_first_attempt_uses_base() {
        assert_eq!(retry_delay(30, 3.0, 1), 30);
    }

    #[test]
    fn test_attempt_outcome_success_requires_2xx() {
        let ok = AttemptOutcome {
            response_status: Some(204),
            response_body: None,
            duration_ms: 5,
            error: None,
        };
        assert!(ok.is_success());

        let client_error = AttemptOutcome {
            response_status: Some(404),
            response_body: None,
            duration_ms: 5,
            error: Some("HTTP 404".to_string()),
        };
        assert!(!client_error.is_success());

        let network = AttemptOutcome {
            response_status: None,
            response_body: None,
            duration_ms: 5,
            error: Some("Connection failed".to_string()),
        };
        assert!(!network.is_success());
    }

    #[test]
    fn test_headers_to_map() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers.insert("X-Custom", "test-value".parse().unwrap());

        let map = headers_to_map(&headers);
        assert_eq!(map.get("content-type").unwrap(), "application/json");
        assert_eq!(map.get("x-custom").unwrap(), "test-value");
    }
}
