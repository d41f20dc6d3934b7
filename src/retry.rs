//! Requeue backoff with exponential growth and jitter.
//!
//! The reconciler never retries on its own: a failed reconciliation returns
//! its error to the controller runtime, whose error policy asks this module
//! how long to wait before the next attempt. Delays grow per object key and
//! reset once the key reconciles successfully. Keys that stop failing without
//! a successful reconcile (the object was deleted) are pruned once they have
//! not failed for twice the maximum delay.
//!
//! # Example
//!
//! ```ignore
//! use kim::retry::{BackoffConfig, RequeueBackoff};
//!
//! let backoff = RequeueBackoff::new(BackoffConfig::default());
//! let delay = backoff.next_delay("team-a/alice");
//! // ... later, after a successful reconcile
//! backoff.reset("team-a/alice");
//! ```

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for requeue delays after failed reconciliations.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Un-jittered delay for the given consecutive failure count (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    attempts: u32,
    last_failure: Instant,
}

/// Per-key consecutive failure tracking for requeue delays.
///
/// Safe to share between concurrent reconciliations of different keys.
#[derive(Debug, Default)]
pub struct RequeueBackoff {
    config: BackoffConfig,
    failures: DashMap<String, FailureRecord>,
}

impl RequeueBackoff {
    /// Create a backoff tracker with the given configuration
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    ///
    /// Applies 0.5x to 1.5x jitter so that many keys failing together do not
    /// retry in lockstep. The result never exceeds `max_delay`.
    pub fn next_delay(&self, key: &str) -> Duration {
        let now = Instant::now();
        self.prune_stale(now);

        let attempt = {
            let mut record = self
                .failures
                .entry(key.to_string())
                .or_insert(FailureRecord {
                    attempts: 0,
                    last_failure: now,
                });
            record.attempts = record.attempts.saturating_add(1);
            record.last_failure = now;
            record.attempts
        };

        let base = self.config.delay_for_attempt(attempt);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(
            (base.as_secs_f64() * jitter).min(self.config.max_delay.as_secs_f64()),
        );

        debug!(key, attempt, delay_ms = delay.as_millis(), "computed requeue delay");
        delay
    }

    /// Forget failures recorded for `key`
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|r| r.attempts).unwrap_or(0)
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.failures.len()
    }

    /// Drop keys whose last failure is older than twice the maximum delay
    ///
    /// A key that is still failing is requeued within `max_delay`, so its
    /// record is refreshed long before it can expire.
    fn prune_stale(&self, now: Instant) {
        let ttl = self.config.max_delay * 2;
        self.failures
            .retain(|_, record| now.saturating_duration_since(record.last_failure) < ttl);
    }
}
