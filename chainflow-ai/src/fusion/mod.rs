//! Result fusion

pub mod hybrid_merger;

pub use hybrid_merger::HybridMerger;
