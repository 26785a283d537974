//! Infrastructure layer for Strata.
//!
//! Contains implementations of the traits defined in `strata-core`:
//! SQLite storage for the archive, knowledge graph and digests, the
//! OpenAI-compatible embedding and chat clients, and the config loader.

pub mod config;
pub mod openai;
pub mod sqlite;
