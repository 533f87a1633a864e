//! Event types for the chainflow event system
//!
//! Events are broadcast via [`EventBus`] and can be serialized for external
//! observability consumers (dashboards, log shippers).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Aggregated pipeline counters pushed to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Messages that reached DONE
    pub tasks_completed: u64,
    /// Task attempts that ended FAILED (including later retried ones)
    pub tasks_failed: u64,
    /// Messages parked for manual inspection
    pub tasks_parked: u64,
    /// Model-call retries across all workers
    pub inference_retries: u64,
    /// Final results by decision
    pub generated_results: u64,
    pub hybrid_results: u64,
    pub fallback_results: u64,
    /// Quality score histogram, bucket `i` counts scores in `[i, i+1)` (bucket 10 is exactly 10)
    pub quality_histogram: [u64; 11],
    /// Share of assessed phases that ended on the fallback (0.0-1.0)
    pub fallback_rate: f64,
    /// Completed messages per minute since the run started
    pub tasks_per_minute: f64,
    /// Workers currently executing a task
    pub active_workers: u64,
    /// Phase 1 fingerprint cache counters
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Seconds since the run started
    pub elapsed_seconds: u64,
}

/// Chainflow event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChainflowEvent {
    /// A batch of chains was scored and queued
    BatchStarted {
        run_id: Uuid,
        chains: usize,
        messages: usize,
        complete_chains: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A message finished every assigned phase
    MessageCompleted {
        run_id: Uuid,
        chain_id: String,
        message_id: String,
        phases_run: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A message attempt failed
    MessageFailed {
        run_id: Uuid,
        chain_id: String,
        message_id: String,
        reason: String,
        /// True when the retry bound is exhausted and the message is parked
        parked: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic metrics push
    MetricsUpdated {
        run_id: Uuid,
        snapshot: MetricsSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All workers stopped (queue exhausted or shutdown drained)
    BatchFinished {
        run_id: Uuid,
        completed: u64,
        parked: u64,
        drained_by_shutdown: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for [`ChainflowEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainflowEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChainflowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChainflowEvent,
    ) -> Result<usize, broadcast::error::SendError<ChainflowEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: ChainflowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit(ChainflowEvent::BatchFinished {
            run_id,
            completed: 3,
            parked: 1,
            drained_by_shutdown: false,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            ChainflowEvent::BatchFinished { completed, parked, .. } => {
                assert_eq!(completed, 3);
                assert_eq!(parked, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(4);
        let result = bus.emit(ChainflowEvent::MetricsUpdated {
            run_id: Uuid::new_v4(),
            snapshot: MetricsSnapshot::default(),
            timestamp: chrono::Utc::now(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_emit_lossy_does_not_panic_on_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();
        for _ in 0..10 {
            bus.emit_lossy(ChainflowEvent::MetricsUpdated {
                run_id: Uuid::new_v4(),
                snapshot: MetricsSnapshot::default(),
                timestamp: chrono::Utc::now(),
            });
        }
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ChainflowEvent::MessageFailed {
            run_id: Uuid::nil(),
            chain_id: "c1".to_string(),
            message_id: "m1".to_string(),
            reason: "timeout".to_string(),
            parked: true,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MessageFailed");
        assert_eq!(json["parked"], true);
    }
}
