//! Per-worker request pacing
//!
//! A model call that finished faster than the floor latency leaves the
//! endpoint with spare capacity the next call would grab immediately, so the
//! worker waits until `min_spacing` has passed since that call started. A call
//! slower than the floor earns no throttle.

use crate::config::RateConfig;
use crate::workflow::backoff::Clock;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub floor: Duration,
    pub min_spacing: Duration,
}

impl RatePolicy {
    pub fn from_config(config: &RateConfig) -> Self {
        Self {
            floor: Duration::from_millis(config.floor_ms),
            min_spacing: Duration::from_millis(config.min_spacing_ms),
        }
    }

    /// Wait owed after a call that took `elapsed`
    pub fn throttle_after(&self, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.floor {
            return None;
        }
        let wait = self.min_spacing.saturating_sub(elapsed);
        (!wait.is_zero()).then_some(wait)
    }
}

/// Pacing state owned by one worker
#[derive(Debug)]
pub struct RatePacer {
    policy: RatePolicy,
    not_before: Option<Instant>,
}

impl RatePacer {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            not_before: None,
        }
    }

    /// Sleep until this worker may issue its next request
    pub async fn wait_turn(&mut self, clock: &dyn Clock) {
        if let Some(not_before) = self.not_before.take() {
            let now = clock.now();
            if not_before > now {
                let wait = not_before - now;
                tracing::debug!(wait_ms = wait.as_millis() as u64, "Throttling before next model call");
                clock.sleep(wait).await;
            }
        }
    }

    /// Record a finished call that started at `started`
    pub fn record_call(&mut self, started: Instant, clock: &dyn Clock) {
        let elapsed = clock.now().saturating_duration_since(started);
        self.not_before = self
            .policy
            .throttle_after(elapsed)
            .map(|wait| clock.now() + wait);
    }
}
