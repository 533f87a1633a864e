//! Pipeline run handle
//!
//! `Pipeline` owns everything whose lifetime spans runs (store, connector,
//! fingerprint cache, chain assessments, shutdown token). Each call to
//! `run_batch` or `retry_parked` is one run with its own id and metrics.
//!
//! # Run sequence
//! 1. Reject duplicate message ids, then score every chain once (cached per
//!    message set) and record the assessment
//! 2. Resolve each message's starting phase from its persisted state
//! 3. Hand the tasks to the worker pool
//! 4. Push final metrics and report a `RunSummary`

use crate::analysis::{AssessmentCache, CompletenessAnalyzer};
use crate::cache::{fingerprint_message, FingerprintCache};
use crate::config::ChainflowConfig;
use crate::db::PhaseStore;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::{spawn_reporter, EventBusSink, MetricsSink, PipelineMetrics};
use crate::services::{InferenceConnector, RuleExtractor};
use crate::types::{Chain, MessageStatus, MessageTask};
use crate::validators::QualityAssessor;
use crate::workflow::backoff::{BackoffPolicy, Clock, TokioClock};
use crate::workflow::orchestrator::{next_phase, plan_phases};
use crate::workflow::rate_policy::RatePolicy;
use crate::workflow::worker_pool::{fresh_state, BatchData, MessageEntry, WorkerContext, WorkerPool};
use chainflow_common::events::{ChainflowEvent, EventBus, MetricsSnapshot};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub chains: usize,
    pub complete_chains: usize,
    pub messages: usize,
    /// Messages handed to the worker pool
    pub messages_enqueued: usize,
    /// Messages already done or parked, not enqueued
    pub messages_skipped: usize,
    pub messages_completed: u64,
    pub messages_parked: u64,
    pub drained_by_shutdown: bool,
    pub halted: bool,
    pub metrics: MetricsSnapshot,
}

pub struct Pipeline {
    config: ChainflowConfig,
    store: Arc<dyn PhaseStore>,
    connector: Arc<dyn InferenceConnector>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    sinks: Vec<Arc<dyn MetricsSink>>,
    analyzer: CompletenessAnalyzer,
    cache: Arc<FingerprintCache>,
    assessments: AssessmentCache,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Validates `config`; an invalid configuration never starts a run
    pub fn new(
        config: ChainflowConfig,
        store: Arc<dyn PhaseStore>,
        connector: Arc<dyn InferenceConnector>,
    ) -> PipelineResult<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            analyzer: CompletenessAnalyzer::from_config(&config.pipeline),
            cache: Arc::new(FingerprintCache::new(config.pipeline.cache_capacity)),
            assessments: AssessmentCache::new(),
            config,
            store,
            connector,
            clock: Arc::new(TokioClock),
            events: None,
            sinks: Vec::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Token whose cancellation drains the current run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop picking up tasks; in-flight tasks finish and persist
    pub fn shutdown(&self) {
        info!("Shutdown requested, draining in-flight tasks");
        self.shutdown.cancel();
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn config(&self) -> &ChainflowConfig {
        &self.config
    }

    /// Process a batch of chains, resuming any message with persisted progress
    pub async fn run_batch(&self, chains: Vec<Chain>) -> PipelineResult<RunSummary> {
        self.run(chains, None).await
    }

    /// Release parked messages of `chains` and process them again from their
    /// last successful phase. Parked messages not in `chains` stay parked.
    pub async fn retry_parked(&self, chains: Vec<Chain>) -> PipelineResult<RunSummary> {
        ensure_unique_ids(&chains)?;
        let known: HashSet<&str> = chains
            .iter()
            .flat_map(|c| c.messages.iter().map(|m| m.message_id.as_str()))
            .collect();

        let mut released = HashSet::new();
        for mut state in self.store.list_parked().await? {
            if !known.contains(state.message_id.as_str()) {
                warn!(message_id = %state.message_id, "Parked message not in input, left parked");
                continue;
            }
            state.parked = false;
            state.status = MessageStatus::Pending;
            state.attempts = 0;
            state.failure_reason = None;
            self.store.save_message_state(&state).await?;
            released.insert(state.message_id);
        }

        info!(released = released.len(), "Parked messages released for retry");
        self.run(chains, Some(released)).await
    }

    async fn run(&self, chains: Vec<Chain>, only: Option<HashSet<String>>) -> PipelineResult<RunSummary> {
        ensure_unique_ids(&chains)?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let metrics = Arc::new(PipelineMetrics::new());
        // The cache outlives runs; report this run's share only
        let (hits_before, misses_before) = (self.cache.hits(), self.cache.misses());

        // 1. Score chains
        let mut batch = BatchData::default();
        let mut complete_chains = 0usize;
        let mut message_count = 0usize;
        for chain in chains {
            let (assessment, scored) = self.assessments.get_or_score(&self.analyzer, &chain);
            if scored {
                if let Some(previous) = self
                    .store
                    .load_chain_assessment(&chain.chain_id, &assessment.message_set_fingerprint)
                    .await?
                {
                    if previous.is_complete != assessment.is_complete {
                        warn!(
                            chain_id = %chain.chain_id,
                            previous_score = previous.completeness_score,
                            score = assessment.completeness_score,
                            "Completeness verdict changed since the stored assessment (threshold changed?)"
                        );
                    }
                }
                self.store.save_chain_assessment(&assessment).await?;
            }
            if assessment.is_complete {
                complete_chains += 1;
            }

            let chain = Arc::new(chain);
            for (index, message) in chain.messages.iter().enumerate() {
                message_count += 1;
                batch.messages.insert(
                    message.message_id.clone(),
                    MessageEntry {
                        chain: Arc::clone(&chain),
                        index,
                        content_fingerprint: fingerprint_message(message),
                    },
                );
            }
            batch.assessments.insert(chain.chain_id.clone(), assessment);
        }
        let chain_count = batch.assessments.len();

        // 2. Starting phase per message
        let mut tasks = Vec::new();
        let mut skipped = 0usize;
        let mut ids: Vec<&String> = batch.messages.keys().collect();
        ids.sort();
        for message_id in ids {
            if let Some(only) = &only {
                if !only.contains(message_id) {
                    continue;
                }
            }
            let entry = &batch.messages[message_id];
            let chain_id = &entry.chain.chain_id;
            let is_complete = batch.is_complete(chain_id);

            let state = match self.store.load_message_state(message_id).await? {
                Some(existing) if existing.content_fingerprint == entry.content_fingerprint => {
                    if existing.parked {
                        skipped += 1;
                        continue;
                    }
                    existing
                }
                _ => fresh_state(entry, is_complete),
            };

            let Some(phase) = next_phase(state.current_phase, is_complete) else {
                skipped += 1;
                continue;
            };

            let mut state = state;
            state.assigned_phases = plan_phases(is_complete);
            state.status = MessageStatus::Pending;
            self.store.save_message_state(&state).await?;

            tasks.push(MessageTask {
                chain_id: chain_id.clone(),
                message_id: message_id.clone(),
                phase,
                attempt: 1,
            });
        }

        let enqueued = tasks.len();
        info!(
            run_id = %run_id,
            chains = chain_count,
            complete_chains,
            messages = message_count,
            enqueued,
            skipped,
            "Batch prepared"
        );
        if let Some(bus) = &self.events {
            bus.emit_lossy(ChainflowEvent::BatchStarted {
                run_id,
                chains: chain_count,
                messages: message_count,
                complete_chains,
                timestamp: chrono::Utc::now(),
            });
        }

        // 3. Execute
        let snapshot_fn = {
            let metrics = Arc::clone(&metrics);
            let cache = Arc::clone(&self.cache);
            move || {
                metrics.snapshot(
                    started.elapsed(),
                    cache.hits().saturating_sub(hits_before),
                    cache.misses().saturating_sub(misses_before),
                )
            }
        };
        let mut sinks = self.sinks.clone();
        if let Some(bus) = &self.events {
            sinks.push(Arc::new(EventBusSink::new(bus.clone(), run_id)));
        }
        let reporter_stop = CancellationToken::new();
        let reporter = (!sinks.is_empty()).then(|| {
            spawn_reporter(
                Duration::from_secs(self.config.pipeline.metrics_interval_secs),
                sinks.clone(),
                reporter_stop.clone(),
                snapshot_fn.clone(),
            )
        });

        let ctx = Arc::new(WorkerContext {
            pipeline: self.config.pipeline.clone(),
            inference: self.config.inference.clone(),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            extractor: RuleExtractor::new(),
            assessor: QualityAssessor::new(self.config.pipeline.quality.clone()),
            backoff: BackoffPolicy::from_config(&self.config.pipeline.backoff),
            rate: RatePolicy::from_config(&self.config.pipeline.rate),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&metrics),
            events: self.events.clone(),
            run_id,
        });

        let pool_result = WorkerPool::run(
            ctx,
            Arc::new(batch),
            self.connector.as_ref(),
            tasks,
            self.shutdown.clone(),
        )
        .await;

        // 4. Report
        reporter_stop.cancel();
        if let Some(handle) = reporter {
            let _ = handle.await;
        }
        let final_snapshot = snapshot_fn();
        for sink in &sinks {
            sink.push(&final_snapshot);
        }

        let outcome = pool_result?;
        if let Some(bus) = &self.events {
            bus.emit_lossy(ChainflowEvent::BatchFinished {
                run_id,
                completed: outcome.messages_completed,
                parked: outcome.messages_parked,
                drained_by_shutdown: outcome.drained_by_shutdown,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(RunSummary {
            run_id,
            chains: chain_count,
            complete_chains,
            messages: message_count,
            messages_enqueued: enqueued,
            messages_skipped: skipped,
            messages_completed: outcome.messages_completed,
            messages_parked: outcome.messages_parked,
            drained_by_shutdown: outcome.drained_by_shutdown,
            halted: outcome.halted,
            metrics: final_snapshot,
        })
    }
}

/// Message ids key per-message state, so a batch must not repeat one
fn ensure_unique_ids(chains: &[Chain]) -> PipelineResult<()> {
    let mut seen = HashSet::new();
    for message in chains.iter().flat_map(|c| c.messages.iter()) {
        if !seen.insert(message.message_id.as_str()) {
            return Err(PipelineError::DuplicateMessage(message.message_id.clone()));
        }
    }
    Ok(())
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workers", &self.config.pipeline.workers)
            .field("cached_chains", &self.assessments.len())
            .field("cached_phase1", &self.cache.len())
            .finish()
    }
}

