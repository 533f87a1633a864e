//! Run-scoped pipeline counters
//!
//! One `PipelineMetrics` per pipeline run, shared by the workers through an
//! `Arc`. All counters are lock-free atomics.

use crate::types::ResultSource;
use chainflow_common::events::MetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_parked: AtomicU64,
    inference_retries: AtomicU64,
    generated_results: AtomicU64,
    hybrid_results: AtomicU64,
    fallback_results: AtomicU64,
    /// Buckets 0..=10 of the rounded-down quality score
    quality_histogram: [AtomicU64; 11],
    active_workers: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_parked(&self) {
        self.tasks_parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inference_retries(&self, retries: u32) {
        self.inference_retries
            .fetch_add(retries as u64, Ordering::Relaxed);
    }

    /// Count the final source of a generative phase and its quality score
    pub fn record_generative_result(&self, source: ResultSource, total_score: f32) {
        match source {
            ResultSource::Generated => &self.generated_results,
            ResultSource::Hybrid => &self.hybrid_results,
            ResultSource::RuleBased => &self.fallback_results,
        }
        .fetch_add(1, Ordering::Relaxed);

        let bucket = total_score.clamp(0.0, 10.0).floor() as usize;
        self.quality_histogram[bucket.min(10)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        let _ = self
            .active_workers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self, elapsed: Duration, cache_hits: u64, cache_misses: u64) -> MetricsSnapshot {
        let generated = self.generated_results.load(Ordering::Relaxed);
        let hybrid = self.hybrid_results.load(Ordering::Relaxed);
        let fallback = self.fallback_results.load(Ordering::Relaxed);
        let assessed = generated + hybrid + fallback;
        let completed = self.tasks_completed.load(Ordering::Relaxed);

        let minutes = elapsed.as_secs_f64() / 60.0;
        let mut histogram = [0u64; 11];
        for (slot, counter) in histogram.iter_mut().zip(self.quality_histogram.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }

        MetricsSnapshot {
            tasks_completed: completed,
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_parked: self.tasks_parked.load(Ordering::Relaxed),
            inference_retries: self.inference_retries.load(Ordering::Relaxed),
            generated_results: generated,
            hybrid_results: hybrid,
            fallback_results: fallback,
            quality_histogram: histogram,
            fallback_rate: if assessed == 0 {
                0.0
            } else {
                fallback as f64 / assessed as f64
            },
            tasks_per_minute: if minutes > 0.0 {
                completed as f64 / minutes
            } else {
                0.0
            },
            active_workers: self.active_workers.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            elapsed_seconds: elapsed.as_secs(),
        }
    }
}
