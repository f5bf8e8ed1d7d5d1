//! # docflow-inference
//!
//! Language-model access for the docflow pipeline.
//!
//! This crate provides:
//! - The HTTP model-gateway client (`HttpModelGateway`), the production
//!   implementation of `docflow_core::LanguageModelService`
//! - Balanced-brace JSON extraction for model replies that wrap JSON in prose
//! - The vision failure classifier and capability learner, which learn per
//!   `(provider, model)` whether image input is actually supported
//! - A deterministic mock model service for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Expose `MockModelService` to downstream crates' tests

pub mod gateway;
pub mod json;
pub mod vision;

// Mock model service for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use gateway::HttpModelGateway;
pub use json::{extract_json_block, parse_json_object};
pub use vision::{
    classify_vision_failure, FailureClass, VisionFailureAssessment, VisionLearner,
};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockCall, MockEmbeddingGenerator, MockModelService};
