//! Dispatch configuration management.

use std::env;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use uuid::Uuid;

use crate::error::DispatchError;

/// Configuration for the dispatcher and its background runner.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Identifier stamped on event claims (`claimed_by`).
    pub worker_id: String,
    /// 32-byte key for endpoint secret encryption at rest.
    pub encryption_key: Vec<u8>,
    /// Maximum events claimed per dispatch cycle.
    pub claim_limit: i64,
    /// Events per processing batch.
    pub batch_size: usize,
    /// Batches processed concurrently.
    pub max_concurrent_batches: usize,
    /// Concurrent per-event dispatch tasks across all batches.
    pub concurrent_workers: usize,
    /// Background poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Claims older than this are considered abandoned and reclaimable.
    pub claim_stale_secs: f64,
    /// Due retries claimed per retry cycle.
    pub retry_batch_size: i64,
    /// Workers draining the queued-action channel.
    pub queue_workers: usize,
    /// Allow plain-HTTP endpoint URLs (development only).
    pub allow_http: bool,
    /// Allow endpoints on private/internal hosts (development only).
    pub allow_internal_hosts: bool,
}

impl DispatchConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FANOUT_ENCRYPTION_KEY`: base64-encoded 32-byte key
    ///
    /// Optional (shown with defaults):
    /// - `FANOUT_WORKER_ID` (generated)
    /// - `FANOUT_CLAIM_LIMIT` (200)
    /// - `FANOUT_BATCH_SIZE` (50)
    /// - `FANOUT_MAX_CONCURRENT_BATCHES` (2)
    /// - `FANOUT_CONCURRENT_WORKERS` (10)
    /// - `FANOUT_POLL_INTERVAL_MS` (1000)
    /// - `FANOUT_CLAIM_STALE_SECS` (300)
    /// - `FANOUT_RETRY_BATCH_SIZE` (50)
    /// - `FANOUT_QUEUE_WORKERS` (4)
    /// - `FANOUT_ALLOW_HTTP` (false)
    /// - `FANOUT_ALLOW_INTERNAL_HOSTS` (false)
    pub fn from_env() -> Result<Self, DispatchError> {
        let key_b64 =
            env::var("FANOUT_ENCRYPTION_KEY").map_err(|_| DispatchError::ConfigMissing {
                var: "FANOUT_ENCRYPTION_KEY".to_string(),
            })?;

        let encryption_key =
            BASE64
                .decode(&key_b64)
                .map_err(|e| DispatchError::ConfigInvalid {
                    var: "FANOUT_ENCRYPTION_KEY".to_string(),
                    reason: format!("not valid base64: {e}"),
                })?;

        if encryption_key.len() != 32 {
            return Err(DispatchError::ConfigInvalid {
                var: "FANOUT_ENCRYPTION_KEY".to_string(),
                reason: format!("expected 32 bytes, got {}", encryption_key.len()),
            });
        }

        Ok(Self {
            worker_id: env::var("FANOUT_WORKER_ID")
                .unwrap_or_else(|_| default_worker_id()),
            encryption_key,
            claim_limit: env_parse("FANOUT_CLAIM_LIMIT", 200)?,
            batch_size: env_parse("FANOUT_BATCH_SIZE", 50)?,
            max_concurrent_batches: env_parse("FANOUT_MAX_CONCURRENT_BATCHES", 2)?,
            concurrent_workers: env_parse("FANOUT_CONCURRENT_WORKERS", 10)?,
            poll_interval_ms: env_parse("FANOUT_POLL_INTERVAL_MS", 1000)?,
            claim_stale_secs: env_parse("FANOUT_CLAIM_STALE_SECS", 300.0)?,
            retry_batch_size: env_parse("FANOUT_RETRY_BATCH_SIZE", 50)?,
            queue_workers: env_parse("FANOUT_QUEUE_WORKERS", 4)?,
            allow_http: env_flag("FANOUT_ALLOW_HTTP"),
            allow_internal_hosts: env_flag("FANOUT_ALLOW_INTERNAL_HOSTS"),
        })
    }

    /// Configuration with the given key and defaults everywhere else.
    /// Useful for tests and embedded use.
    #[must_use]
    pub fn with_key(encryption_key: Vec<u8>) -> Self {
        Self {
            worker_id: default_worker_id(),
            encryption_key,
            claim_limit: 200,
            batch_size: 50,
            max_concurrent_batches: 2,
            concurrent_workers: 10,
            poll_interval_ms: 1000,
            claim_stale_secs: 300.0,
            retry_batch_size: 50,
            queue_workers: 4,
            allow_http: false,
            allow_internal_hosts: false,
        }
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_concurrent_workers(mut self, workers: usize) -> Self {
        self.concurrent_workers = workers;
        self
    }

    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    #[must_use]
    pub fn with_allow_internal_hosts(mut self, allow: bool) -> Self {
        self.allow_internal_hosts = allow;
        self
    }
}

fn default_worker_id() -> String {
    format!("fanout-worker-{}", Uuid::new_v4().simple())
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> Result<T, DispatchError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| DispatchError::ConfigInvalid {
            var: var.to_string(),
            reason: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_flag(var: &str) -> bool {
    env::var(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
