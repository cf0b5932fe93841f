//! Background dispatch runner.
//!
//! Polls the event store for unprocessed events, drives due delivery
//! retries, and periodically releases stale claims left behind by crashed
//! workers. Spawn via `tokio::spawn`; stop through the watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::DispatchConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::DispatchError;

/// Multiplier applied to the poll interval after a transient store error.
const BACKOFF_FACTOR: u32 = 5;

/// Poll loop around an [`EventDispatcher`].
pub struct DispatchRunner {
    dispatcher: EventDispatcher,
    claim_limit: i64,
    batch_size: usize,
    max_concurrent_batches: usize,
    concurrent_workers: usize,
    retry_batch_size: i64,
    poll_interval: Duration,
    stale_release_interval: Duration,
}

impl DispatchRunner {
    #[must_use]
    pub fn new(dispatcher: EventDispatcher, config: &DispatchConfig) -> Self {
        Self {
            dispatcher,
            claim_limit: config.claim_limit,
            batch_size: config.batch_size,
            max_concurrent_batches: config.max_concurrent_batches,
            concurrent_workers: config.concurrent_workers,
            retry_batch_size: config.retry_batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            stale_release_interval: Duration::from_secs(60),
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the dispatch loop until cancelled.
    ///
    /// Transient store errors back off for a few poll intervals and retry
    /// the whole cycle; partial progress is never rolled back.
    pub async fn run(self: Arc<Self>, cancel: tokio::sync::watch::Receiver<bool>) {
        info!(
            target: "event_dispatch",
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            claim_limit = self.claim_limit,
            "Dispatch runner started"
        );

        let mut poll = interval(self.poll_interval);
        let mut stale = interval(self.stale_release_interval);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if *cancel.borrow() {
                        info!(target: "event_dispatch", "Dispatch runner cancelled, stopping");
                        break;
                    }

                    if let Err(e) = self.dispatch_cycle().await {
                        if e.is_transient() {
                            warn!(
                                target: "event_dispatch",
                                error = %e,
                                backoff_intervals = BACKOFF_FACTOR,
                                "Transient store error; backing off"
                            );
                            tokio::time::sleep(self.poll_interval * BACKOFF_FACTOR).await;
                        } else {
                            error!(
                                target: "event_dispatch",
                                error = %e,
                                "Dispatch cycle failed"
                            );
                        }
                    }
                }
                _ = stale.tick() => {
                    match self.dispatcher.release_stale_claims().await {
                        Ok(released) if released > 0 => {
                            warn!(
                                target: "event_dispatch",
                                released,
                                "Released stale event claims"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(
                                target: "event_dispatch",
                                error = %e,
                                "Failed to release stale claims"
                            );
                        }
                    }
                }
            }
        }
    }

    /// One cycle: process the backlog, then due retries.
    async fn dispatch_cycle(&self) -> Result<(), DispatchError> {
        let processed = self
            .dispatcher
            .dispatch_unprocessed_optimized(
                self.claim_limit,
                self.batch_size,
                self.max_concurrent_batches,
                self.concurrent_workers,
            )
            .await?;

        let retried = self
            .dispatcher
            .process_due_retries(self.retry_batch_size)
            .await?;

        if processed > 0 || retried > 0 {
            info!(
                target: "event_dispatch",
                processed,
                retried,
                "Dispatch cycle complete"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_configuration() {
        // Construction is pure; exercised end-to-end in integration tests.
        let config = DispatchConfig::with_key(vec![0u8; 32]).with_batch_size(7);
        assert_eq!(config.batch_size, 7);
        assert!(Duration::from_millis(config.poll_interval_ms).as_millis() >= 10);
    }
}
