//! DigestRepository trait definition.

use strata_types::digest::{ScoredDigest, SummaryDigest};
use strata_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for summary digests.
pub trait DigestRepository: Send + Sync {
    /// Persist a digest and its covered-conversation links atomically.
    ///
    /// A conversation is covered by at most one digest; inserting a second
    /// digest for it fails with `Conflict` and writes nothing.
    fn insert_digest(
        &self,
        digest: &SummaryDigest,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove a digest and release the conversations it covered.
    ///
    /// Used when a conversation changed after its digest was written.
    fn delete_digest(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The digest covering a conversation, if one was written.
    fn find_digest_for_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<SummaryDigest>, RepositoryError>> + Send;

    fn get_digest(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<SummaryDigest>, RepositoryError>> + Send;

    /// Digests newest first.
    fn list_digests(
        &self,
        owner: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<SummaryDigest>, RepositoryError>> + Send;

    /// Digests ranked by similarity of their embedding to `query`, newest
    /// first on ties. Only embeddings of the query's dimension are compared.
    fn top_digests(
        &self,
        query: &[f32],
        k: usize,
        owner: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredDigest>, RepositoryError>> + Send;

    fn count_digests(&self)
    -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
