//! Progress and metrics

pub mod sink;
pub mod statistics;

pub use sink::{spawn_reporter, EventBusSink, MetricsSink, TracingSink};
pub use statistics::PipelineMetrics;
