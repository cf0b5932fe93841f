//! Dispatch monitoring: per-endpoint and per-action outcome counters with
//! threshold-based alerting.
//!
//! Counters are process-local and guarded by a plain `RwLock`: recording is
//! a short synchronous critical section, never held across an await, so the
//! collector can be called from async tasks and from the executor's
//! synchronous outcome hook alike.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum observations before a failure-rate alert can fire.
const ALERT_MIN_SAMPLES: u64 = 10;

/// Failure rate at or above which an alert fires.
const ALERT_FAILURE_RATE: f64 = 0.5;

/// Success/failure tallies for one delivery or action target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetStats {
    pub success: u64,
    pub failure: u64,
    /// Failures recorded without an outbound call (open circuit).
    pub fast_failed: u64,
}

impl TargetStats {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.success + self.failure + self.fast_failed
    }

    /// Failure rate over everything observed, fast-fails included.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.failure + self.fast_failed) as f64 / total as f64
    }

    fn breaches_threshold(&self) -> bool {
        self.total() >= ALERT_MIN_SAMPLES && self.failure_rate() >= ALERT_FAILURE_RATE
    }
}

/// A threshold breach on one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub target_kind: String,
    pub target_id: Uuid,
    pub failure_rate: f64,
    pub observations: u64,
}

/// Readable snapshot of everything the collector tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_claimed: u64,
    pub events_dispatched: u64,
    pub endpoints: HashMap<Uuid, TargetStats>,
    pub actions: HashMap<Uuid, TargetStats>,
    pub alerts: Vec<Alert>,
}

#[derive(Default)]
struct Inner {
    events_claimed: u64,
    events_dispatched: u64,
    endpoints: HashMap<Uuid, TargetStats>,
    actions: HashMap<Uuid, TargetStats>,
}

/// Process-local metrics collector.
#[derive(Clone, Default)]
pub struct DispatchMetrics {
    inner: Arc<RwLock<Inner>>,
}

impl DispatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_claimed(&self, count: usize) {
        if let Ok(mut inner) = self.inner.write() {
            inner.events_claimed += count as u64;
        }
    }

    pub fn record_dispatched(&self, count: usize) {
        if let Ok(mut inner) = self.inner.write() {
            inner.events_dispatched += count as u64;
        }
    }

    /// Record one delivery outcome for an endpoint.
    pub fn record_delivery(&self, endpoint_id: Uuid, success: bool, fast_failed: bool) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        let stats = inner.endpoints.entry(endpoint_id).or_default();
        if success {
            stats.success += 1;
        } else if fast_failed {
            stats.fast_failed += 1;
        } else {
            stats.failure += 1;
        }

        if !success && stats.breaches_threshold() {
            let failure_rate = stats.failure_rate();
            let observations = stats.total();
            tracing::warn!(
                target: "dispatch_monitoring",
                endpoint_id = %endpoint_id,
                failure_rate,
                observations,
                "Endpoint failure rate above alert threshold"
            );
        }
    }

    /// Record one action invocation outcome.
    pub fn record_action(&self, action_id: Uuid, success: bool) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        let stats = inner.actions.entry(action_id).or_default();
        if success {
            stats.success += 1;
        } else {
            stats.failure += 1;
        }

        if !success && stats.breaches_threshold() {
            let failure_rate = stats.failure_rate();
            let observations = stats.total();
            tracing::warn!(
                target: "dispatch_monitoring",
                action_id = %action_id,
                failure_rate,
                observations,
                "Action failure rate above alert threshold"
            );
        }
    }

    /// Current alerts: every target at or above the failure-rate threshold.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        let mut alerts = Vec::new();

        for (id, stats) in &inner.endpoints {
            if stats.breaches_threshold() {
                alerts.push(Alert {
                    target_kind: "endpoint".to_string(),
                    target_id: *id,
                    failure_rate: stats.failure_rate(),
                    observations: stats.total(),
                });
            }
        }
        for (id, stats) in &inner.actions {
            if stats.breaches_threshold() {
                alerts.push(Alert {
                    target_kind: "action".to_string(),
                    target_id: *id,
                    failure_rate: stats.failure_rate(),
                    observations: stats.total(),
                });
            }
        }

        alerts
    }

    /// Snapshot everything for the admin surface.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let alerts = self.alerts();
        let Ok(inner) = self.inner.read() else {
            return MetricsSnapshot {
                events_claimed: 0,
                events_dispatched: 0,
                endpoints: HashMap::new(),
                actions: HashMap::new(),
                alerts,
            };
        };
        MetricsSnapshot {
            events_claimed: inner.events_claimed,
            events_dispatched: inner.events_dispatched,
            endpoints: inner.endpoints.clone(),
            actions: inner.actions.clone(),
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate() {
        let stats = TargetStats {
            success: 3,
            failure: 6,
            fast_failed: 1,
        };
        assert_eq!(stats.total(), 10);
        assert!((stats.failure_rate() - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stats_rate_is_zero() {
        assert_eq!(TargetStats::default().failure_rate(), 0.0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = DispatchMetrics::new();
        metrics.record_claimed(5);
        metrics.record_dispatched(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_claimed, 5);
        assert_eq!(snapshot.events_dispatched, 4);
    }

    #[test]
    fn test_no_alert_below_min_samples() {
        let metrics = DispatchMetrics::new();
        let endpoint = Uuid::new_v4();
        for _ in 0..5 {
            metrics.record_delivery(endpoint, false, false);
        }
        assert!(metrics.alerts().is_empty());
    }

    #[test]
    fn test_alert_fires_past_threshold() {
        let metrics = DispatchMetrics::new();
        let endpoint = Uuid::new_v4();
        for _ in 0..4 {
            metrics.record_delivery(endpoint, true, false);
        }
        for _ in 0..6 {
            metrics.record_delivery(endpoint, false, false);
        }

        let alerts = metrics.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].target_kind, "endpoint");
        assert_eq!(alerts[0].target_id, endpoint);
        assert!(alerts[0].failure_rate >= 0.5);
    }

    #[test]
    fn test_healthy_target_never_alerts() {
        let metrics = DispatchMetrics::new();
        let action = Uuid::new_v4();
        for _ in 0..50 {
            metrics.record_action(action, true);
        }
        assert!(metrics.alerts().is_empty());
    }

    #[test]
    fn test_fast_fails_count_toward_rate() {
        let metrics = DispatchMetrics::new();
        let endpoint = Uuid::new_v4();
        for _ in 0..10 {
            metrics.record_delivery(endpoint, false, true);
        }

        let snapshot = metrics.snapshot();
        let stats = snapshot.endpoints.get(&endpoint).unwrap();
        assert_eq!(stats.fast_failed, 10);
        assert_eq!(stats.failure, 0);
        assert!(!snapshot.alerts.is_empty());
    }
}
