//! # docflow-core
//!
//! Core types, traits, and abstractions for the docflow pipeline.
//!
//! This crate provides the foundational data structures, the error taxonomy,
//! and the collaborator contracts that other docflow crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
