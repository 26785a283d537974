//! Layered memory engine for Strata.
//!
//! This crate defines the "ports" (repository, embedder, summarizer,
//! extractor and LLM provider traits) and the logic that keeps the memory
//! layers consistent. It depends only on `strata-types` -- never on
//! `strata-infra` or any database/IO crate.

pub mod embedding;
pub mod engine;
pub mod knowledge;
pub mod llm;
pub mod repository;
pub mod summary;
pub mod tokens;

pub use engine::{EngineConfig, MAX_SEARCH_K, MemoryEngine};
