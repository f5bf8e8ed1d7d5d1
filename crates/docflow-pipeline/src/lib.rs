//! # docflow-pipeline
//!
//! Triage routing and the end-to-end ingestion orchestrator.
//!
//! This crate provides:
//! - Content-based triage that routes documents to an inline fast path
//!   or an OCR work queue, with a quality gate on PDF text layers
//!   (`triage`)
//! - The per-document orchestrator: duplicate detection, baseline
//!   extraction, policy evaluation, outcome persistence, and
//!   fire-and-forget semantic indexing (`Orchestrator`)
//!
//! The orchestrator is storage-agnostic: it speaks to repositories,
//! work queues, and event sinks through the `docflow-core` traits, so
//! the same flow runs against Postgres in production and in-memory
//! doubles in tests.

pub mod orchestrator;
pub mod triage;

#[cfg(test)]
mod testing;

pub use orchestrator::{content_hash, IncomingDocument, Orchestrator, PipelineOutcome};
pub use triage::{
    extract_pdf_text, is_fast_path_extension, is_pdf_text_extractable, pdftotext_available, route,
    sniff_mime, PdfText, TriageRoute,
};
