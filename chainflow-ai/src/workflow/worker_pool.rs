//! Worker Pool & Scheduler
//!
//! A fixed number of workers pull `(chain, message, phase)` tasks from one
//! shared queue. Each worker runs a task end to end (fallback, model call,
//! quality gate, merge, persist) before pulling the next one. When a phase
//! completes, the message's next phase goes back on the queue, so phases of
//! one message never overlap.
//!
//! Each worker opens its own inference session through the connector.
//!
//! Shutdown: cancelling the shutdown token stops new pickups. Tasks already
//! picked up run to completion (including their model call and writes).
//! A store that stops answering halts dispatch the same way.

use crate::cache::FingerprintCache;
use crate::config::{InferenceConfig, PipelineConfig};
use crate::db::PhaseStore;
use crate::error::{InferenceError, PipelineError, PipelineResult};
use crate::fusion::HybridMerger;
use crate::metrics::PipelineMetrics;
use crate::services::prompt_builder::prompt_for;
use crate::services::{parse_generated, CallMeta, GenerationRequest, InferenceClient, InferenceConnector, RuleExtractor};
use crate::types::{
    Chain, ChainAssessment, Decision, GeneratedOutput, Message, MessageState, MessageStatus,
    MessageTask, Phase, PhaseResult, ResultSource,
};
use crate::validators::QualityAssessor;
use crate::workflow::backoff::{BackoffPolicy, Clock};
use crate::workflow::orchestrator::{next_phase, phase_state, plan_phases, previous_phase};
use crate::workflow::rate_policy::{RatePacer, RatePolicy};
use chainflow_common::events::{ChainflowEvent, EventBus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A message of the batch with its chain
#[derive(Debug, Clone)]
pub struct MessageEntry {
    pub chain: Arc<Chain>,
    pub index: usize,
    pub content_fingerprint: String,
}

impl MessageEntry {
    pub fn message(&self) -> &Message {
        &self.chain.messages[self.index]
    }
}

/// Chains and assessments of one batch, read-only while workers run
#[derive(Debug, Default)]
pub struct BatchData {
    pub messages: HashMap<String, MessageEntry>,
    pub assessments: HashMap<String, Arc<ChainAssessment>>,
}

impl BatchData {
    pub fn is_complete(&self, chain_id: &str) -> bool {
        self.assessments
            .get(chain_id)
            .map_or(false, |a| a.is_complete)
    }
}

/// Everything a worker needs, scoped to one pipeline run
pub struct WorkerContext {
    pub pipeline: PipelineConfig,
    pub inference: InferenceConfig,
    pub store: Arc<dyn PhaseStore>,
    pub cache: Arc<FingerprintCache>,
    pub extractor: RuleExtractor,
    pub assessor: QualityAssessor,
    pub backoff: BackoffPolicy,
    pub rate: RatePolicy,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,
    pub events: Option<EventBus>,
    pub run_id: Uuid,
}

/// How a pool run ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub messages_completed: u64,
    pub messages_parked: u64,
    /// Shutdown was requested before the queue drained
    pub drained_by_shutdown: bool,
    /// Dispatch stopped because the store became unreachable
    pub halted: bool,
}

enum TaskOutcome {
    /// Enqueue this follow-up task
    Continue(MessageTask),
    /// The message leaves the queue (done or parked)
    Finished,
}

/// State shared by the workers of one pool run
struct Shared {
    ctx: Arc<WorkerContext>,
    batch: Arc<BatchData>,
    queue_tx: mpsc::UnboundedSender<MessageTask>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<MessageTask>>,
    /// Messages still in the queue or in flight
    outstanding: AtomicUsize,
    all_done: CancellationToken,
    dispatch: CancellationToken,
    halted: AtomicBool,
    completed: AtomicU64,
    parked: AtomicU64,
}

pub struct WorkerPool;

impl WorkerPool {
    /// Run `tasks` to completion (or until shutdown) with `ctx.pipeline.workers` workers
    pub async fn run(
        ctx: Arc<WorkerContext>,
        batch: Arc<BatchData>,
        connector: &dyn InferenceConnector,
        tasks: Vec<MessageTask>,
        shutdown: CancellationToken,
    ) -> PipelineResult<PoolOutcome> {
        let workers = ctx.pipeline.workers.max(1);

        // Sessions first: a worker without a session must not start the run
        let mut clients = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let client = connector
                .connect(worker_id)
                .map_err(|source| PipelineError::Session { worker_id, source })?;
            clients.push(client);
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            ctx: Arc::clone(&ctx),
            batch,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            outstanding: AtomicUsize::new(tasks.len()),
            all_done: CancellationToken::new(),
            dispatch: shutdown.child_token(),
            halted: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            parked: AtomicU64::new(0),
        });

        let total = tasks.len();
        if total == 0 {
            shared.all_done.cancel();
        }
        for task in tasks {
            // Receiver is alive in `shared`
            let _ = shared.queue_tx.send(task);
        }

        info!(run_id = %ctx.run_id, workers, tasks = total, "Worker pool started");

        let handles: Vec<_> = clients
            .into_iter()
            .enumerate()
            .map(|(worker_id, client)| {
                let worker = Worker {
                    id: worker_id,
                    shared: Arc::clone(&shared),
                    client,
                    pacer: RatePacer::new(ctx.rate),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }

        let outcome = PoolOutcome {
            messages_completed: shared.completed.load(Ordering::Relaxed),
            messages_parked: shared.parked.load(Ordering::Relaxed),
            drained_by_shutdown: shutdown.is_cancelled() && !shared.all_done.is_cancelled(),
            halted: shared.halted.load(Ordering::Relaxed),
        };

        info!(
            run_id = %ctx.run_id,
            completed = outcome.messages_completed,
            parked = outcome.messages_parked,
            drained_by_shutdown = outcome.drained_by_shutdown,
            halted = outcome.halted,
            "Worker pool stopped"
        );
        Ok(outcome)
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    client: Box<dyn InferenceClient>,
    pacer: RatePacer,
}

impl Worker {
    async fn run(mut self) {
        let metrics = Arc::clone(&self.shared.ctx.metrics);
        metrics.worker_started();
        debug!(worker_id = self.id, "Worker started");

        loop {
            let task = {
                let mut queue = self.shared.queue_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shared.dispatch.cancelled() => None,
                    _ = self.shared.all_done.cancelled() => None,
                    task = queue.recv() => task,
                }
            };
            let Some(task) = task else { break };

            match self.execute(task).await {
                TaskOutcome::Continue(next) => {
                    let _ = self.shared.queue_tx.send(next);
                }
                TaskOutcome::Finished => {
                    if self.shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.shared.all_done.cancel();
                    }
                }
            }
        }

        metrics.worker_stopped();
        debug!(worker_id = self.id, "Worker stopped");
    }

    async fn execute(&mut self, task: MessageTask) -> TaskOutcome {
        let shared = Arc::clone(&self.shared);
        let ctx = &shared.ctx;

        let Some(entry) = shared.batch.messages.get(&task.message_id) else {
            error!(message_id = %task.message_id, "Task references a message outside this batch");
            ctx.metrics.task_failed();
            return TaskOutcome::Finished;
        };
        let is_complete = shared.batch.is_complete(&task.chain_id);

        let mut state = match ctx.store.load_message_state(&task.message_id).await {
            Ok(Some(state)) => state,
            Ok(None) => fresh_state(entry, is_complete),
            Err(e) => {
                let state = resumed_state(entry, is_complete, task.phase);
                return self.fail(task, state, PipelineError::Store(e)).await;
            }
        };

        state.status = MessageStatus::InPhase;
        if let Err(e) = ctx.store.save_message_state(&state).await {
            return self.fail(task, state, PipelineError::Store(e)).await;
        }

        debug!(
            worker_id = self.id,
            message_id = %task.message_id,
            phase = %task.phase,
            attempt = task.attempt,
            "Task started"
        );

        let result = match self.run_phase(task.phase, entry, is_complete).await {
            Ok(result) => result,
            Err(e) => return self.fail(task, state, e).await,
        };

        if let Err(e) = ctx.store.upsert_phase_result(&task.message_id, &result).await {
            return self.fail(task, state, PipelineError::Store(e)).await;
        }

        state.current_phase = Some(task.phase);
        state.attempts = 0;
        state.failure_reason = None;
        state.parked = false;

        let next = next_phase(state.current_phase, is_complete);
        state.status = if next.is_some() {
            MessageStatus::Pending
        } else {
            MessageStatus::Done
        };
        if let Err(e) = ctx.store.save_message_state(&state).await {
            return self.fail(task, state, PipelineError::Store(e)).await;
        }

        debug!(
            worker_id = self.id,
            message_id = %task.message_id,
            phase = %task.phase,
            source = result.source.as_str(),
            quality = ?result.quality_score,
            state = ?phase_state(state.current_phase, is_complete),
            "Phase persisted"
        );

        match next {
            Some(phase) => TaskOutcome::Continue(MessageTask {
                chain_id: task.chain_id,
                message_id: task.message_id,
                phase,
                attempt: 1,
            }),
            None => {
                ctx.metrics.task_completed();
                shared.completed.fetch_add(1, Ordering::Relaxed);
                if let Some(bus) = &ctx.events {
                    bus.emit_lossy(ChainflowEvent::MessageCompleted {
                        run_id: ctx.run_id,
                        chain_id: task.chain_id,
                        message_id: task.message_id,
                        phases_run: state.assigned_phases.len(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                TaskOutcome::Finished
            }
        }
    }

    async fn run_phase(
        &mut self,
        phase: Phase,
        entry: &MessageEntry,
        is_complete: bool,
    ) -> PipelineResult<PhaseResult> {
        match phase {
            Phase::One => self.rule_phase(entry).await,
            Phase::Two | Phase::Three => {
                if phase == Phase::Three && !is_complete {
                    return Err(PipelineError::Unknown {
                        kind: "phase 3 plan for incomplete chain",
                        id: entry.message().message_id.clone(),
                    });
                }
                self.generative_phase(phase, entry).await
            }
        }
    }

    /// Phase 1 through the fingerprint cache
    async fn rule_phase(&self, entry: &MessageEntry) -> PipelineResult<PhaseResult> {
        let ctx = &self.shared.ctx;
        let started = ctx.clock.now();
        let (payload, origin) = ctx
            .cache
            .get_or_compute(&entry.content_fingerprint, ctx.store.as_ref(), || {
                ctx.extractor.extract(entry.message())
            })
            .await?;

        debug!(message_id = %entry.message().message_id, ?origin, "Phase 1 resolved");

        Ok(PhaseResult {
            phase: Phase::One,
            payload,
            source: ResultSource::RuleBased,
            quality_score: None,
            latency_ms: elapsed_ms(ctx.clock.as_ref(), started),
            retry_count: 0,
        })
    }

    /// The Phase 1 result of this message, from the store or recomputed
    async fn fallback_for(&self, entry: &MessageEntry) -> PipelineResult<PhaseResult> {
        let ctx = &self.shared.ctx;
        match ctx
            .store
            .get_phase_result(&entry.message().message_id, Phase::One)
            .await?
        {
            Some(result) => Ok(result),
            None => self.rule_phase(entry).await,
        }
    }

    async fn generative_phase(&mut self, phase: Phase, entry: &MessageEntry) -> PipelineResult<PhaseResult> {
        let shared = Arc::clone(&self.shared);
        let ctx = &shared.ctx;
        let message = entry.message();

        let fallback = self.fallback_for(entry).await?;
        let previous = match phase {
            Phase::Three => ctx
                .store
                .get_phase_result(&message.message_id, Phase::Two)
                .await?
                .map(|r| r.payload)
                .unwrap_or_else(|| fallback.payload.clone()),
            _ => fallback.payload.clone(),
        };

        let assessment = shared
            .batch
            .assessments
            .get(&entry.chain.chain_id)
            .cloned()
            .ok_or_else(|| PipelineError::Unknown {
                kind: "chain",
                id: entry.chain.chain_id.clone(),
            })?;

        let request = GenerationRequest {
            prompt: prompt_for(phase, message, &entry.chain, &assessment, &previous),
            max_tokens: ctx.inference.max_tokens,
            temperature: ctx.inference.temperature,
            timeout: ctx.inference.timeout(),
        };

        self.pacer.wait_turn(ctx.clock.as_ref()).await;
        let started = ctx.clock.now();
        let client: &dyn InferenceClient = self.client.as_ref();
        let request_ref = &request;
        let outcome = ctx
            .backoff
            .retry(ctx.clock.as_ref(), InferenceError::is_transient, move |_attempt| {
                client.generate(request_ref)
            })
            .await;
        self.pacer.record_call(started, ctx.clock.as_ref());
        let latency_ms = elapsed_ms(ctx.clock.as_ref(), started);

        let (generated, retry_count) = match outcome {
            Ok((text, retries)) => {
                ctx.metrics.inference_retries(retries);
                let meta = CallMeta {
                    phase,
                    latency_ms,
                    retry_count: retries,
                    high_priority: fallback.payload.high_priority,
                };
                (parse_generated(&text, meta), retries)
            }
            Err(failure) if failure.error.is_transient() => {
                ctx.metrics.inference_retries(failure.attempts.saturating_sub(1));
                warn!(
                    message_id = %message.message_id,
                    phase = %phase,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Inference retries exhausted"
                );
                return Err(PipelineError::InferenceExhausted {
                    attempts: failure.attempts,
                    source: failure.error,
                });
            }
            Err(failure) => {
                // Permanent endpoint error: no generated result
                warn!(
                    message_id = %message.message_id,
                    phase = %phase,
                    error = %failure.error,
                    "Inference failed permanently, using fallback"
                );
                let retries = failure.attempts.saturating_sub(1);
                (
                    GeneratedOutput::ParseError {
                        reason: format!("inference error: {}", failure.error),
                    },
                    retries,
                )
            }
        };

        let quality = ctx.assessor.assess(&generated, &fallback);
        ctx.store
            .record_quality_audit(&message.message_id, phase, &quality)
            .await?;

        let final_result = match (quality.decision, generated) {
            (Decision::UseGenerated, GeneratedOutput::Parsed(mut result)) => {
                result.quality_score = Some(quality.total_score);
                result
            }
            (Decision::UseHybrid, GeneratedOutput::Parsed(result)) => {
                HybridMerger::new(&ctx.assessor).merge(&result, &fallback, quality.total_score)
            }
            _ => PhaseResult {
                phase,
                payload: fallback.payload.clone(),
                source: ResultSource::RuleBased,
                quality_score: None,
                latency_ms,
                retry_count,
            },
        };

        ctx.metrics
            .record_generative_result(final_result.source, quality.total_score);

        debug!(
            message_id = %message.message_id,
            phase = %phase,
            score = quality.total_score,
            decision = quality.decision.as_str(),
            deductions = quality.deductions.len(),
            "Quality gate applied"
        );

        Ok(final_result)
    }

    /// Record a failed task: retry transient errors, park the rest
    async fn fail(&self, task: MessageTask, mut state: MessageState, err: PipelineError) -> TaskOutcome {
        let ctx = &self.shared.ctx;
        ctx.metrics.task_failed();

        if matches!(err, PipelineError::Store(_)) {
            self.check_store().await;
        }

        let retry = err.is_transient() && task.attempt < ctx.pipeline.max_task_retries;
        state.status = MessageStatus::Failed;
        state.attempts = task.attempt;
        state.failure_reason = Some(err.to_string());
        state.parked = !retry;

        if let Err(e) = ctx.store.save_message_state(&state).await {
            error!(message_id = %task.message_id, error = %e, "Failed to record task failure");
        }

        if retry {
            warn!(
                message_id = %task.message_id,
                phase = %task.phase,
                attempt = task.attempt,
                error = %err,
                "Task failed, re-enqueueing"
            );
            return TaskOutcome::Continue(MessageTask {
                attempt: task.attempt + 1,
                ..task
            });
        }

        error!(
            message_id = %task.message_id,
            phase = %task.phase,
            attempts = task.attempt,
            error = %err,
            "Task failed permanently, parking message"
        );
        ctx.metrics.task_parked();
        self.shared.parked.fetch_add(1, Ordering::Relaxed);
        if let Some(bus) = &ctx.events {
            bus.emit_lossy(ChainflowEvent::MessageFailed {
                run_id: ctx.run_id,
                chain_id: task.chain_id,
                message_id: task.message_id,
                reason: err.to_string(),
                parked: true,
                timestamp: chrono::Utc::now(),
            });
        }
        TaskOutcome::Finished
    }

    /// Halt dispatch when the store stops answering
    async fn check_store(&self) {
        if let Err(e) = self.shared.ctx.store.ping().await {
            error!(error = %e, "Store unreachable, halting task dispatch");
            self.shared.halted.store(true, Ordering::Relaxed);
            self.shared.dispatch.cancel();
        }
    }
}

/// Initial state for a message seen for the first time
pub fn fresh_state(entry: &MessageEntry, is_complete: bool) -> MessageState {
    let message = entry.message();
    MessageState {
        message_id: message.message_id.clone(),
        chain_id: message.chain_id.clone(),
        content_fingerprint: entry.content_fingerprint.clone(),
        assigned_phases: plan_phases(is_complete),
        current_phase: None,
        status: MessageStatus::Pending,
        attempts: 0,
        failure_reason: None,
        parked: false,
    }
}

/// State rebuilt when the persisted one cannot be read
///
/// A task for `phase` is only dispatched once the phase before it has been
/// persisted, so that phase is the last successful one.
fn resumed_state(entry: &MessageEntry, is_complete: bool, phase: Phase) -> MessageState {
    MessageState {
        current_phase: previous_phase(phase),
        ..fresh_state(entry, is_complete)
    }
}

fn elapsed_ms(clock: &dyn Clock, started: tokio::time::Instant) -> u64 {
    clock.now().saturating_duration_since(started).as_millis() as u64
}
