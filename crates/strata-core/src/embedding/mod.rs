//! Embedding provider adapter.
//!
//! The [`Embedder`] trait is the seam for remote providers; the
//! [`EmbeddingAdapter`] wraps an optional primary with the deterministic
//! [`HashEmbedder`] so embedding never fails the caller.

pub mod adapter;
pub mod box_embedder;
pub mod embedder;
pub mod hash;
pub mod vector;

pub use adapter::{Embedding, EmbeddingAdapter};
pub use box_embedder::BoxEmbedder;
pub use embedder::Embedder;
pub use hash::HashEmbedder;
