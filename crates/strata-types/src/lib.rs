//! Shared domain types for Strata.
//!
//! This crate contains the core domain types used across the layered memory
//! engine: conversations and messages (the archive), knowledge facts, summary
//! digests, search scopes and results, maintenance reports, configuration,
//! and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod archive;
pub mod config;
pub mod digest;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod maintenance;
pub mod search;
