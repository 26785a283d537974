//! SQLite summary digest repository implementation.
//!
//! `digest_conversations.conversation_id` is UNIQUE, which is what makes
//! compaction retries safe: a second digest for an already-covered
//! conversation fails the whole insert transaction with `Conflict`.
//! Digest vectors are indexed in `digest_vectors_*` in the same transaction.

use sqlx::Row;
use uuid::Uuid;

use strata_core::embedding::vector::{blob_to_vec, vec_to_blob};
use strata_core::repository::DigestRepository;
use strata_types::archive::EmbeddingSource;
use strata_types::digest::{ScoredDigest, SummaryDigest};
use strata_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::vector::{self, KnnWindow, VectorIndex};
use super::{format_datetime, is_unique_violation, parse_datetime, parse_uuid, query_error};

const DIGEST_COLUMNS: &str = "id, owner, window_start, window_end, text, highlights, \
     embedding_source, created_at, \
     (SELECT GROUP_CONCAT(conversation_id) FROM digest_conversations \
      WHERE digest_conversations.digest_id = summary_digests.id) AS conversation_ids";

/// SQLite-backed implementation of `DigestRepository`.
pub struct SqliteDigestRepository {
    pool: DatabasePool,
}

impl SqliteDigestRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct DigestRow {
    id: String,
    owner: String,
    window_start: String,
    window_end: String,
    text: String,
    highlights: String,
    embedding_source: Option<String>,
    created_at: String,
    conversation_ids: Option<String>,
}

impl DigestRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            window_start: row.try_get("window_start")?,
            window_end: row.try_get("window_end")?,
            text: row.try_get("text")?,
            highlights: row.try_get("highlights")?,
            embedding_source: row.try_get("embedding_source")?,
            created_at: row.try_get("created_at")?,
            conversation_ids: row.try_get("conversation_ids")?,
        })
    }

    /// `embedding` is only loaded by the similarity query.
    fn into_digest(self, embedding: Option<Vec<f32>>) -> Result<SummaryDigest, RepositoryError> {
        let mut conversation_ids = self
            .conversation_ids
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| parse_uuid(s, "conversation id"))
            .collect::<Result<Vec<_>, _>>()?;
        conversation_ids.sort();

        let highlights: Vec<String> = serde_json::from_str(&self.highlights)
            .map_err(|e| RepositoryError::Query(format!("invalid highlights: {e}")))?;
        let embedding_source = self
            .embedding_source
            .as_deref()
            .map(str::parse::<EmbeddingSource>)
            .transpose()
            .map_err(RepositoryError::Query)?;

        Ok(SummaryDigest {
            id: parse_uuid(&self.id, "digest id")?,
            owner: self.owner,
            window_start: parse_datetime(&self.window_start)?,
            window_end: parse_datetime(&self.window_end)?,
            conversation_ids,
            text: self.text,
            highlights,
            embedding,
            embedding_source,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl DigestRepository for SqliteDigestRepository {
    async fn insert_digest(&self, digest: &SummaryDigest) -> Result<(), RepositoryError> {
        let highlights = serde_json::to_string(&digest.highlights)
            .map_err(|e| RepositoryError::Query(format!("serialize highlights: {e}")))?;

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO summary_digests (id, owner, window_start, window_end, text, highlights, embedding, embedding_source, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(digest.id.to_string())
        .bind(&digest.owner)
        .bind(format_datetime(&digest.window_start))
        .bind(format_datetime(&digest.window_end))
        .bind(&digest.text)
        .bind(highlights)
        .bind(digest.embedding.as_deref().map(vec_to_blob))
        .bind(digest.embedding_source.map(|s| s.to_string()))
        .bind(format_datetime(&digest.created_at))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        for conversation_id in &digest.conversation_ids {
            sqlx::query("INSERT INTO digest_conversations (digest_id, conversation_id) VALUES (?, ?)")
                .bind(digest.id.to_string())
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        return RepositoryError::Conflict(format!(
                            "conversation {conversation_id} is already covered by a digest"
                        ));
                    }
                    query_error(e)
                })?;
        }

        if let Some(embedding) = digest.embedding.as_deref().filter(|v| !v.is_empty()) {
            vector::upsert(&mut *tx, VectorIndex::Digests, &digest.id, embedding).await?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn delete_digest(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        // Coverage links go with the digest (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM summary_digests WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        vector::remove(&mut *tx, VectorIndex::Digests, id).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn find_digest_for_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<SummaryDigest>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"SELECT {DIGEST_COLUMNS} FROM summary_digests
               WHERE id = (SELECT digest_id FROM digest_conversations WHERE conversation_id = ?)"#
        ))
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|r| DigestRow::from_row(&r).map_err(query_error)?.into_digest(None))
            .transpose()
    }

    async fn get_digest(&self, id: &Uuid) -> Result<Option<SummaryDigest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DIGEST_COLUMNS} FROM summary_digests WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| DigestRow::from_row(&r).map_err(query_error)?.into_digest(None))
            .transpose()
    }

    async fn list_digests(
        &self,
        owner: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SummaryDigest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {DIGEST_COLUMNS} FROM summary_digests
               WHERE (? IS NULL OR owner = ?)
               ORDER BY created_at DESC, id DESC
               LIMIT ?"#
        ))
        .bind(owner)
        .bind(owner)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| DigestRow::from_row(r).map_err(query_error)?.into_digest(None))
            .collect()
    }

    async fn top_digests(
        &self,
        query: &[f32],
        k: usize,
        owner: Option<&str>,
    ) -> Result<Vec<ScoredDigest>, RepositoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some((table, indexed)) =
            vector::searchable(&self.pool.reader, VectorIndex::Digests, query.len()).await?
        else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"WITH knn AS (
                   SELECT digest_id, distance FROM {table}
                   WHERE embedding MATCH ? AND k = ?
               )
               SELECT {DIGEST_COLUMNS}, summary_digests.embedding AS embedding,
                      knn.distance AS distance
               FROM knn
               JOIN summary_digests ON summary_digests.id = knn.digest_id
               WHERE (? IS NULL OR owner = ?)
               ORDER BY knn.distance, created_at DESC, id
               LIMIT ?"#
        );
        let blob = vec_to_blob(query);
        let mut window = KnnWindow::new(k, indexed);

        let rows = loop {
            let rows = sqlx::query(&sql)
                .bind(&blob)
                .bind(window.size() as i64)
                .bind(owner)
                .bind(owner)
                .bind(k as i64)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_error)?;
            if rows.len() >= k || !window.widen() {
                break rows;
            }
        };

        rows.iter()
            .map(|row| {
                let distance: f64 = row.try_get("distance").map_err(query_error)?;
                let blob: Option<Vec<u8>> = row.try_get("embedding").map_err(query_error)?;
                let digest = DigestRow::from_row(row)
                    .map_err(query_error)?
                    .into_digest(blob.as_deref().map(blob_to_vec))?;
                Ok(ScoredDigest {
                    score: vector::score(distance),
                    digest,
                })
            })
            .collect()
    }

    async fn count_digests(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM summary_digests")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::archive::SqliteArchiveRepository;
    use crate::sqlite::test_pool;
    use chrono::{Duration, Utc};
    use strata_core::repository::ArchiveRepository;
    use strata_types::archive::{MessageRole, NewConversation, NewMessage};

    async fn conversation(archive: &SqliteArchiveRepository, owner: &str) -> Uuid {
        archive
            .create_conversation(&NewConversation {
                owner: owner.into(),
                project: None,
                title: None,
                messages: vec![NewMessage::new(MessageRole::User, "hello")],
            })
            .await
            .unwrap()
            .conversation
            .id
    }

    fn digest(owner: &str, conversation_ids: Vec<Uuid>, axis: usize) -> SummaryDigest {
        let now = Utc::now();
        let mut embedding = vec![0.0; 4];
        embedding[axis] = 1.0;
        SummaryDigest {
            id: Uuid::now_v7(),
            owner: owner.into(),
            window_start: now - Duration::days(1),
            window_end: now,
            conversation_ids,
            text: "- talked about themes\nHighlights: themes".into(),
            highlights: vec!["themes".into()],
            embedding: Some(embedding),
            embedding_source: Some(EmbeddingSource::Fallback),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let pool = test_pool().await;
        let archive = SqliteArchiveRepository::new(pool.clone());
        let repo = SqliteDigestRepository::new(pool);
        let conv = conversation(&archive, "alice").await;

        let d = digest("alice", vec![conv], 0);
        repo.insert_digest(&d).await.unwrap();

        let found = repo.find_digest_for_conversation(&conv).await.unwrap().unwrap();
        assert_eq!(found.id, d.id);
        assert_eq!(found.conversation_ids, vec![conv]);
        assert_eq!(found.highlights, vec!["themes".to_string()]);
        assert_eq!(found.embedding_source, Some(EmbeddingSource::Fallback));
        assert!(found.embedding.is_none());

        assert!(repo
            .find_digest_for_conversation(&Uuid::now_v7())
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.get_digest(&d.id).await.unwrap().unwrap().text, d.text);
    }

    #[tokio::test]
    async fn test_second_digest_for_conversation_conflicts() {
        let pool = test_pool().await;
        let archive = SqliteArchiveRepository::new(pool.clone());
        let repo = SqliteDigestRepository::new(pool);
        let conv = conversation(&archive, "alice").await;

        repo.insert_digest(&digest("alice", vec![conv], 0)).await.unwrap();
        let err = repo.insert_digest(&digest("alice", vec![conv], 1)).await;
        assert!(matches!(err, Err(RepositoryError::Conflict(_))));

        // The failed insert wrote nothing.
        assert_eq!(repo.count_digests().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_and_rank_by_owner() {
        let pool = test_pool().await;
        let archive = SqliteArchiveRepository::new(pool.clone());
        let repo = SqliteDigestRepository::new(pool);

        let a1 = conversation(&archive, "alice").await;
        let a2 = conversation(&archive, "alice").await;
        let b1 = conversation(&archive, "bob").await;
        repo.insert_digest(&digest("alice", vec![a1], 0)).await.unwrap();
        repo.insert_digest(&digest("alice", vec![a2], 1)).await.unwrap();
        repo.insert_digest(&digest("bob", vec![b1], 1)).await.unwrap();

        assert_eq!(repo.list_digests(None, 10).await.unwrap().len(), 3);
        assert_eq!(repo.list_digests(Some("alice"), 10).await.unwrap().len(), 2);

        let top = repo
            .top_digests(&[0.0, 1.0, 0.0, 0.0], 5, Some("alice"))
            .await
            .unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].digest.conversation_ids, vec![a2]);
        assert!(top[0].digest.embedding.is_some());
        assert!(top[0].score > top[1].score);
    }

    #[tokio::test]
    async fn test_owner_filter_widens_past_other_owners() {
        let pool = test_pool().await;
        let archive = SqliteArchiveRepository::new(pool.clone());
        let repo = SqliteDigestRepository::new(pool);

        for _ in 0..6 {
            let conv = conversation(&archive, "bob").await;
            repo.insert_digest(&digest("bob", vec![conv], 0)).await.unwrap();
        }
        let conv = conversation(&archive, "alice").await;
        repo.insert_digest(&digest("alice", vec![conv], 1)).await.unwrap();

        let top = repo
            .top_digests(&[1.0, 0.0, 0.0, 0.0], 1, Some("alice"))
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].digest.conversation_ids, vec![conv]);
        assert!(top[0].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_releases_the_conversation() {
        let pool = test_pool().await;
        let archive = SqliteArchiveRepository::new(pool.clone());
        let repo = SqliteDigestRepository::new(pool);
        let conv = conversation(&archive, "alice").await;

        let first = digest("alice", vec![conv], 0);
        repo.insert_digest(&first).await.unwrap();
        repo.delete_digest(&first.id).await.unwrap();

        assert!(repo.find_digest_for_conversation(&conv).await.unwrap().is_none());
        assert!(repo
            .top_digests(&[1.0, 0.0, 0.0, 0.0], 5, None)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            repo.delete_digest(&first.id).await,
            Err(RepositoryError::NotFound)
        ));

        // The conversation can be covered again.
        repo.insert_digest(&digest("alice", vec![conv], 1)).await.unwrap();
        assert_eq!(repo.count_digests().await.unwrap(), 1);
    }
}
