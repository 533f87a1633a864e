//! Error types for chainflow-ai
//!
//! Task-level errors are classified so the scheduler can tell a transient
//! inference hiccup (retry with backoff) from a deterministic-stage failure
//! (fail the task, keep the pool running).

use thiserror::Error;

/// Inference endpoint error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    /// Per-call timeout elapsed
    #[error("inference call timed out after {0} ms")]
    Timeout(u64),

    /// Connection refused/reset or request could not be sent
    #[error("inference connection error: {0}")]
    Connection(String),

    /// Endpoint answered with a non-success status
    #[error("inference endpoint returned status {code}: {body}")]
    Status { code: u16, body: String },

    /// Response envelope could not be decoded
    #[error("invalid inference response: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    /// Timeouts, connection failures, 429 and 5xx are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Timeout(_) | InferenceError::Connection(_) => true,
            InferenceError::Status { code, .. } => *code == 429 || *code >= 500,
            InferenceError::InvalidResponse(_) => false,
        }
    }
}

/// Pipeline task error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Inference failed after the retry bound was exhausted
    #[error("inference failed after {attempts} attempts: {source}")]
    InferenceExhausted {
        attempts: u32,
        #[source]
        source: InferenceError,
    },

    /// A worker could not open its inference session
    #[error("worker {worker_id} could not open an inference session: {source}")]
    Session {
        worker_id: usize,
        #[source]
        source: InferenceError,
    },

    /// Store / cache I/O failure (deterministic stage)
    #[error("store error: {0}")]
    Store(#[from] chainflow_common::Error),

    /// Serialization of a payload failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Two messages of one batch share an id
    #[error("message id {0} appears more than once in the batch")]
    DuplicateMessage(String),

    /// Referenced message or chain is unknown to this run
    #[error("unknown {kind}: {id}")]
    Unknown { kind: &'static str, id: String },

    /// Invalid configuration detected at startup
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// True for errors the scheduler may retry by re-enqueueing the task
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::InferenceExhausted { .. } => true,
            PipelineError::Store(err) => err.is_lock_contention(),
            PipelineError::Session { .. }
            | PipelineError::Serialization(_)
            | PipelineError::DuplicateMessage(_)
            | PipelineError::Unknown { .. }
            | PipelineError::Config(_) => false,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
