//! Phase services: rule extraction and model access

pub mod inference_client;
pub mod prompt_builder;
pub mod response_parser;
pub mod rule_extractor;

pub use inference_client::{
    GenerationRequest, HttpConnector, HttpInferenceClient, InferenceClient, InferenceConnector,
};
pub use response_parser::{parse_generated, CallMeta};
pub use rule_extractor::RuleExtractor;
