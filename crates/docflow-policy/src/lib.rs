//! # docflow-policy
//!
//! Policy matching, field extraction, and action execution.
//!
//! This crate provides:
//! - Condition evaluation over document metadata and text, including
//!   model-verified semantic conditions (`conditions`)
//! - Baseline and policy-scoped field extraction (`extract`)
//! - The ordered first-match-wins policy engine (`PolicyEngine`)
//! - Eight action handlers behind a registry, with `{field}` variable
//!   interpolation and date transformers (`actions`, `variables`)
//! - An in-memory per-owner cache of enabled policies (`PolicyCache`)
//! - Feature-based policy suggestion from confirmed routings
//!   (`PolicyLearner`)
//!
//! Matching is deliberately conservative: model outages and malformed
//! replies fail conditions closed rather than erroring the pipeline, and
//! a policy whose required fields cannot be extracted never runs its
//! actions.

pub mod actions;
pub mod cache;
pub mod conditions;
pub mod engine;
pub mod extract;
pub mod learner;
pub mod variables;

pub use actions::{
    ActionContext, ActionHandler, ActionOutcome, ActionRegistry, ActionRunner,
};
pub use cache::PolicyCache;
pub use conditions::{evaluate_condition, policy_matches, DocumentView};
pub use engine::{chat_options_from_env, EngineOutcome, EngineStatus, PolicyEngine};
pub use extract::{
    append_extracted_section, baseline_extract, extract_policy_fields, missing_required_fields,
};
pub use learner::{extract_features, PolicyLearner};
pub use variables::{build_variables, interpolate, interpolate_json, stringify};
