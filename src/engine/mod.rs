//! Core engine: the single-flight executor, per-iteration accounting, and
//! the outer orchestration loop.

pub mod accountant;
pub mod executor;
pub mod orchestrator;
