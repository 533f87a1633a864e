//! chainflow-ai library
//!
//! Adaptive multi-phase processing of message chains with quality-gated
//! output selection. Exposes modules for the binary and for integration tests.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod metrics;
pub mod services;
pub mod types;
pub mod utils;
pub mod validators;
pub mod workflow;

pub use config::ChainflowConfig;
pub use error::{InferenceError, PipelineError, PipelineResult};
pub use workflow::{Pipeline, RunSummary};
