//! Output validation
//!
//! The quality assessor gates every generated result before it can become final.

pub mod quality_assessor;

pub use quality_assessor::QualityAssessor;
