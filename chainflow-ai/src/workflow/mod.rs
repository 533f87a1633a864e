//! Adaptive multi-phase workflow
//!
//! - `orchestrator`: which phase runs next for a message
//! - `worker_pool`: bounded-concurrency execution with retry, parking and drain
//! - `pipeline`: run handle tying scoring, planning and the pool together
//! - `backoff` / `rate_policy`: retry and pacing policies over an injectable clock

pub mod backoff;
pub mod orchestrator;
pub mod pipeline;
pub mod rate_policy;
pub mod worker_pool;

pub use backoff::{BackoffPolicy, Clock, ManualClock, TokioClock};
pub use orchestrator::{next_phase, plan_phases, PhaseState};
pub use pipeline::{Pipeline, RunSummary};
pub use rate_policy::RatePolicy;
pub use worker_pool::{PoolOutcome, WorkerPool};
