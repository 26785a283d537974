//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (strata-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod archive;
pub mod digest;
pub mod knowledge;

pub use archive::{ArchiveRepository, ExtractionWork};
pub use digest::DigestRepository;
pub use knowledge::{KnowledgeRepository, PreparedFact};
