//! Metrics push
//!
//! The pipeline pushes snapshots to sinks on a fixed interval and once more
//! when the run ends. Sinks never pull from the pipeline.

use chainflow_common::events::{ChainflowEvent, EventBus, MetricsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Receiver of periodic metrics snapshots
pub trait MetricsSink: Send + Sync {
    fn push(&self, snapshot: &MetricsSnapshot);
}

/// Logs each snapshot as a structured tracing event
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn push(&self, s: &MetricsSnapshot) {
        info!(
            tasks_completed = s.tasks_completed,
            tasks_failed = s.tasks_failed,
            tasks_parked = s.tasks_parked,
            tasks_per_minute = format!("{:.1}", s.tasks_per_minute),
            fallback_rate = format!("{:.2}", s.fallback_rate),
            active_workers = s.active_workers,
            cache_hits = s.cache_hits,
            "Pipeline metrics"
        );
    }
}

/// Broadcasts `MetricsUpdated` on the event bus
pub struct EventBusSink {
    bus: EventBus,
    run_id: Uuid,
}

impl EventBusSink {
    pub fn new(bus: EventBus, run_id: Uuid) -> Self {
        Self { bus, run_id }
    }
}

impl MetricsSink for EventBusSink {
    fn push(&self, snapshot: &MetricsSnapshot) {
        self.bus.emit_lossy(ChainflowEvent::MetricsUpdated {
            run_id: self.run_id,
            snapshot: snapshot.clone(),
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Spawn a task pushing `snapshot()` to every sink each `interval` until `stop` fires
pub fn spawn_reporter<F>(
    interval: Duration,
    sinks: Vec<Arc<dyn MetricsSink>>,
    stop: CancellationToken,
    snapshot: F,
) -> JoinHandle<()>
where
    F: Fn() -> MetricsSnapshot + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let current = snapshot();
                    for sink in &sinks {
                        sink.push(&current);
                    }
                }
            }
        }
    })
}
