//! Circuit breaker for webhook delivery targets.
//!
//! Tracks failures per endpoint inside a rolling time window. When the
//! window's failure count crosses the threshold the circuit opens and new
//! attempts to that endpoint are skipped (recorded as fast-failed) for a
//! cool-down period. After cool-down one probe attempt is allowed through;
//! its outcome closes or reopens the circuit.
//!
//! State is process-local. In multi-instance deployments each worker keeps
//! its own view, which is acceptable under the idempotent-receiver
//! assumption.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, deliveries proceed.
    #[default]
    Closed,
    /// Circuit tripped, deliveries are fast-failed.
    Open,
    /// Testing recovery, allows one probe request.
    HalfOpen,
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the rolling window before opening the circuit.
    pub failure_threshold: usize,
    /// Rolling window over which failures are counted.
    pub window_secs: i64,
    /// Cool-down before transitioning from Open to `HalfOpen`.
    pub cooldown_secs: i64,
    /// Maximum number of recent failures to keep for diagnostics.
    pub max_failure_history: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
            max_failure_history: 10,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_window_secs(mut self, secs: i64) -> Self {
        self.window_secs = secs;
        self
    }

    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: i64) -> Self {
        self.cooldown_secs = secs;
        self
    }
}

/// Record of a single delivery failure for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub response_status: Option<i16>,
}

impl FailureRecord {
    #[must_use]
    pub fn new(error: String, response_status: Option<i16>) -> Self {
        Self {
            timestamp: Utc::now(),
            error,
            response_status,
        }
    }
}

/// Circuit breaker for a single endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint_id: Uuid,
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Timestamps of failures inside the rolling window.
    failure_window: Vec<DateTime<Utc>>,
    recent_failures: Vec<FailureRecord>,
    last_success_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(endpoint_id: Uuid, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint_id,
            config,
            state: CircuitState::Closed,
            failure_window: Vec::new(),
            recent_failures: Vec::new(),
            last_success_at: None,
            opened_at: None,
        }
    }

    #[must_use]
    pub fn endpoint_id(&self) -> Uuid {
        self.endpoint_id
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures currently inside the rolling window.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.config.window_secs);
        self.failure_window.iter().filter(|t| **t >= cutoff).count()
    }

    #[must_use]
    pub fn recent_failures(&self) -> &[FailureRecord] {
        &self.recent_failures
    }

    #[must_use]
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Check if a delivery can be executed.
    ///
    /// Handles the automatic Open -> `HalfOpen` transition once the
    /// cool-down has elapsed; the `HalfOpen` state admits a single probe.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    let elapsed = Utc::now().signed_duration_since(opened_at);
                    if elapsed.num_seconds() >= self.config.cooldown_secs {
                        self.state = CircuitState::HalfOpen;
                        tracing::info!(
                            target: "circuit_breaker",
                            endpoint_id = %self.endpoint_id,
                            "Circuit breaker transitioning to half-open for probe"
                        );
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&mut self) {
        self.last_success_at = Some(Utc::now());

        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.failure_window.clear();
                self.recent_failures.clear();
                self.opened_at = None;
                tracing::info!(
                    target: "circuit_breaker",
                    endpoint_id = %self.endpoint_id,
                    "Circuit breaker closed after successful probe"
                );
            }
            CircuitState::Closed => {
                self.failure_window.clear();
            }
            CircuitState::Open => {
                // A retry from a delivery scheduled before the circuit opened
                // can still land here; keep the circuit as-is until a probe.
                tracing::debug!(
                    target: "circuit_breaker",
                    endpoint_id = %self.endpoint_id,
                    "Success recorded while circuit is open"
                );
            }
        }
    }

    /// Record a delivery failure.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(self.config.window_secs);

        self.failure_window.retain(|t| *t >= cutoff);
        self.failure_window.push(now);

        self.recent_failures.push(failure);
        while self.recent_failures.len() > self.config.max_failure_history {
            self.recent_failures.remove(0);
        }

        match self.state {
            CircuitState::Closed => {
                if self.failure_window.len() >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    tracing::warn!(
                        target: "circuit_breaker",
                        endpoint_id = %self.endpoint_id,
                        failures_in_window = self.failure_window.len(),
                        threshold = self.config.failure_threshold,
                        window_secs = self.config.window_secs,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                tracing::warn!(
                    target: "circuit_breaker",
                    endpoint_id = %self.endpoint_id,
                    "Circuit breaker reopened after failed probe"
                );
            }
            CircuitState::Open => {}
        }
    }
}

/// Read-only snapshot of one breaker, for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub endpoint_id: Uuid,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub opened_at: Option<DateTime<Utc>>,
    pub recent_failures: Vec<FailureRecord>,
}

impl From<&CircuitBreaker> for CircuitBreakerStatus {
    fn from(cb: &CircuitBreaker) -> Self {
        Self {
            endpoint_id: cb.endpoint_id,
            state: cb.state,
            failures_in_window: cb.failure_count(),
            opened_at: cb.opened_at,
            recent_failures: cb.recent_failures.clone(),
        }
    }
}

/// Registry of circuit breakers keyed by endpoint.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<Uuid, CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Check if a delivery to the endpoint can proceed.
    pub async fn can_execute(&self, endpoint_id: Uuid) -> bool {
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(endpoint_id)
            .or_insert_with(|| CircuitBreaker::new(endpoint_id, self.config.clone()))
            .can_execute()
    }

    /// Record a successful delivery to the endpoint.
    pub async fn record_success(&self, endpoint_id: Uuid) {
        let mut breakers = self.breakers.write().await;
        if let Some(cb) = breakers.get_mut(&endpoint_id) {
            cb.record_success();
        }
    }

    /// Record a failed delivery to the endpoint.
    pub async fn record_failure(&self, endpoint_id: Uuid, failure: FailureRecord) {
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(endpoint_id)
            .or_insert_with(|| CircuitBreaker::new(endpoint_id, self.config.clone()))
            .record_failure(failure);
    }

    /// Snapshot of one endpoint's breaker, if it has seen traffic.
    pub async fn get_status(&self, endpoint_id: Uuid) -> Option<CircuitBreakerStatus> {
        let breakers = self.breakers.read().await;
        breakers.get(&endpoint_id).map(CircuitBreakerStatus::from)
    }

    /// Snapshot of every breaker the registry tracks.
    pub async fn all_statuses(&self) -> Vec<CircuitBreakerStatus> {
        let breakers = self.breakers.read().await;
        breakers.values().map(CircuitBreakerStatus::from).collect()
    }

    /// Drop a breaker, e.g. when its endpoint is deleted.
    pub async fn remove(&self, endpoint_id: Uuid) {
        let mut breakers = self.breakers.write().await;
        breakers.remove(&endpoint_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize) -> CircuitBreaker {
        CircuitBreaker::new(
            Uuid::new_v4(),
            CircuitBreakerConfig::default().with_failure_threshold(threshold),
        )
    }

    fn fail() -> FailureRecord {
        FailureRecord::new("HTTP 500".to_string(), Some(500))
    }

    #[test]
    fn test_starts_closed() {
        let mut cb = breaker(5);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_opens_after_threshold_within_window() {
        let mut cb = breaker(5);
        for _ in 0..5 {
            cb.record_failure(fail());
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let mut cb = breaker(5);
        for _ in 0..4 {
            cb.record_failure(fail());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_success_clears_window() {
        let mut cb = breaker(5);
        for _ in 0..4 {
            cb.record_failure(fail());
        }
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        for _ in 0..4 {
            cb.record_failure(fail());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_success_closes() {
        let mut cb = breaker(1);
        cb.record_failure(fail());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.state = CircuitState::HalfOpen;
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let mut cb = breaker(1);
        cb.record_failure(fail());
        cb.state = CircuitState::HalfOpen;
        cb.record_failure(fail());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_cooldown_transitions_to_half_open() {
        let mut cb = CircuitBreaker::new(
            Uuid::new_v4(),
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown_secs(0),
        );
        cb.record_failure(fail());
        assert_eq!(cb.state(), CircuitState::Open);

        // Zero cool-down: next check admits the probe.
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_failure_history_bounded() {
        let mut cb = CircuitBreaker::new(
            Uuid::new_v4(),
            CircuitBreakerConfig {
                failure_threshold: 100,
                window_secs: 60,
                cooldown_secs: 30,
                max_failure_history: 3,
            },
        );
        for i in 0..10 {
            cb.record_failure(FailureRecord::new(format!("Error {i}"), None));
        }
        assert_eq!(cb.recent_failures().len(), 3);
        assert_eq!(cb.recent_failures()[0].error, "Error 7");
        assert_eq!(cb.recent_failures()[2].error, "Error 9");
    }

    #[tokio::test]
    async fn test_registry_tracks_per_endpoint() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default().with_failure_threshold(2),
        );
        let healthy = Uuid::new_v4();
        let failing = Uuid::new_v4();

        registry.record_failure(failing, fail()).await;
        registry.record_failure(failing, fail()).await;

        assert!(!registry.can_execute(failing).await);
        assert!(registry.can_execute(healthy).await);

        let status = registry.get_status(failing).await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_registry_remove() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let id = Uuid::new_v4();
        registry.record_failure(id, fail()).await;
        assert!(registry.get_status(id).await.is_some());

        registry.remove(id).await;
        assert!(registry.get_status(id).await.is_none());
    }
}
