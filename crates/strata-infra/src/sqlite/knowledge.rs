//! SQLite knowledge graph repository implementation.
//!
//! Facts are unique on `(kind, value)`; source links are unique on
//! `(fact_id, message_id)`. A merge inserts the link with `INSERT OR IGNORE`
//! and only touches confidence when a new link was actually written, so a
//! message can corroborate a fact at most once. A new fact's vector is
//! indexed in `fact_vectors_*` inside the same transaction.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use strata_core::embedding::vector::vec_to_blob;
use strata_core::repository::{KnowledgeRepository, PreparedFact};
use strata_types::archive::ExtractionStatus;
use strata_types::error::RepositoryError;
use strata_types::knowledge::{
    FactKind, KnowledgeFact, MergeOutcome, ScoredFact, clamp_confidence, combine_confidence,
};

use super::pool::DatabasePool;
use super::vector::{self, KnnWindow, VectorIndex};
use super::{format_datetime, parse_datetime, parse_uuid, placeholders, query_error};

const FACT_COLUMNS: &str = "id, kind, value, confidence, first_seen, last_seen, \
     (SELECT GROUP_CONCAT(message_id) FROM fact_sources WHERE fact_sources.fact_id = knowledge_facts.id) AS sources";

/// SQLite-backed implementation of `KnowledgeRepository`.
pub struct SqliteKnowledgeRepository {
    pool: DatabasePool,
}

impl SqliteKnowledgeRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct FactRow {
    id: String,
    kind: String,
    value: String,
    confidence: f64,
    first_seen: String,
    last_seen: String,
    sources: Option<String>,
}

impl FactRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            value: row.try_get("value")?,
            confidence: row.try_get("confidence")?,
            first_seen: row.try_get("first_seen")?,
            last_seen: row.try_get("last_seen")?,
            sources: row.try_get("sources")?,
        })
    }

    fn into_fact(self) -> Result<KnowledgeFact, RepositoryError> {
        let mut sources = self
            .sources
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| parse_uuid(s, "source message id"))
            .collect::<Result<Vec<_>, _>>()?;
        sources.sort();

        Ok(KnowledgeFact {
            id: parse_uuid(&self.id, "fact id")?,
            kind: self.kind.parse().map_err(RepositoryError::Query)?,
            value: self.value,
            confidence: self.confidence,
            sources,
            first_seen: parse_datetime(&self.first_seen)?,
            last_seen: parse_datetime(&self.last_seen)?,
        })
    }
}

fn rows_to_facts(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<KnowledgeFact>, RepositoryError> {
    rows.iter()
        .map(|r| FactRow::from_row(r).map_err(query_error)?.into_fact())
        .collect()
}

impl KnowledgeRepository for SqliteKnowledgeRepository {
    async fn merge_from_message(
        &self,
        message_id: &Uuid,
        facts: &[PreparedFact],
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<MergeOutcome>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT extraction_status FROM messages WHERE id = ?")
                .bind(message_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_error)?;
        let status: ExtractionStatus = status
            .ok_or(RepositoryError::NotFound)?
            .parse()
            .map_err(RepositoryError::Query)?;
        if status == ExtractionStatus::Merged {
            return Ok(vec![MergeOutcome::Duplicate; facts.len()]);
        }

        let seen = format_datetime(&seen_at);
        let mut outcomes = Vec::with_capacity(facts.len());

        for fact in facts {
            let existing = sqlx::query(
                "SELECT id, confidence FROM knowledge_facts WHERE kind = ? AND value = ?",
            )
            .bind(fact.kind.to_string())
            .bind(&fact.value)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;

            let Some(row) = existing else {
                let fact_uuid = Uuid::now_v7();
                let fact_id = fact_uuid.to_string();
                sqlx::query(
                    r#"INSERT INTO knowledge_facts (id, kind, value, confidence, embedding, first_seen, last_seen)
                       VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                )
                .bind(&fact_id)
                .bind(fact.kind.to_string())
                .bind(&fact.value)
                .bind(clamp_confidence(fact.confidence))
                .bind(vec_to_blob(&fact.embedding))
                .bind(&seen)
                .bind(&seen)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;

                sqlx::query("INSERT INTO fact_sources (fact_id, message_id, created_at) VALUES (?, ?, ?)")
                    .bind(&fact_id)
                    .bind(message_id.to_string())
                    .bind(&seen)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_error)?;

                if !fact.embedding.is_empty() {
                    vector::upsert(&mut *tx, VectorIndex::Facts, &fact_uuid, &fact.embedding).await?;
                }

                outcomes.push(MergeOutcome::Created);
                continue;
            };

            let fact_id: String = row.try_get("id").map_err(query_error)?;
            let prior: f64 = row.try_get("confidence").map_err(query_error)?;

            let linked = sqlx::query(
                "INSERT OR IGNORE INTO fact_sources (fact_id, message_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(&fact_id)
            .bind(message_id.to_string())
            .bind(&seen)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

            if linked.rows_affected() == 0 {
                outcomes.push(MergeOutcome::Duplicate);
                continue;
            }

            sqlx::query(
                r#"UPDATE knowledge_facts
                   SET confidence = ?, first_seen = MIN(first_seen, ?), last_seen = MAX(last_seen, ?)
                   WHERE id = ?"#,
            )
            .bind(combine_confidence(prior, fact.confidence))
            .bind(&seen)
            .bind(&seen)
            .bind(&fact_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

            outcomes.push(MergeOutcome::Corroborated);
        }

        sqlx::query(
            "UPDATE messages SET extraction_status = 'merged', last_error = NULL WHERE id = ?",
        )
        .bind(message_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(outcomes)
    }

    async fn get_fact(&self, id: &Uuid) -> Result<Option<KnowledgeFact>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {FACT_COLUMNS} FROM knowledge_facts WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| FactRow::from_row(&r).map_err(query_error)?.into_fact())
            .transpose()
    }

    async fn find_fact(
        &self,
        kind: FactKind,
        value: &str,
    ) -> Result<Option<KnowledgeFact>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {FACT_COLUMNS} FROM knowledge_facts WHERE kind = ? AND value = ?"
        ))
        .bind(kind.to_string())
        .bind(value)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|r| FactRow::from_row(&r).map_err(query_error)?.into_fact())
            .transpose()
    }

    async fn list_facts(
        &self,
        kind: Option<FactKind>,
        limit: u32,
    ) -> Result<Vec<KnowledgeFact>, RepositoryError> {
        let kind = kind.map(|k| k.to_string());
        let rows = sqlx::query(&format!(
            r#"SELECT {FACT_COLUMNS} FROM knowledge_facts
               WHERE (? IS NULL OR kind = ?)
               ORDER BY confidence DESC, last_seen DESC, id
               LIMIT ?"#
        ))
        .bind(&kind)
        .bind(&kind)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows_to_facts(&rows)
    }

    async fn facts_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<KnowledgeFact>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = placeholders(message_ids.len());
        // Sources are narrowed to messages of the same owners as the hits.
        let sql = format!(
            r#"SELECT id, kind, value, confidence, first_seen, last_seen,
                      (SELECT GROUP_CONCAT(fs.message_id) FROM fact_sources fs
                       JOIN messages m ON m.id = fs.message_id
                       JOIN conversations c ON c.id = m.conversation_id
                       WHERE fs.fact_id = knowledge_facts.id
                         AND c.owner IN (
                             SELECT hc.owner FROM messages hm
                             JOIN conversations hc ON hc.id = hm.conversation_id
                             WHERE hm.id IN ({ids})
                         )) AS sources
               FROM knowledge_facts
               WHERE id IN (SELECT fact_id FROM fact_sources WHERE message_id IN ({ids}))
               ORDER BY confidence DESC, last_seen DESC, id"#
        );
        let mut query = sqlx::query(&sql);
        for _ in 0..2 {
            for id in message_ids {
                query = query.bind(id.to_string());
            }
        }
        let rows = query.fetch_all(&self.pool.reader).await.map_err(query_error)?;

        rows_to_facts(&rows)
    }

    async fn top_facts(&self, query: &[f32], k: usize) -> Result<Vec<ScoredFact>, RepositoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some((table, indexed)) =
            vector::searchable(&self.pool.reader, VectorIndex::Facts, query.len()).await?
        else {
            return Ok(Vec::new());
        };

        // The wider window lets confidence break distance ties at the cut.
        let window = KnnWindow::new(k, indexed);
        let rows = sqlx::query(&format!(
            r#"WITH knn AS (
                   SELECT fact_id, distance FROM {table}
                   WHERE embedding MATCH ? AND k = ?
               )
               SELECT {FACT_COLUMNS}, knn.distance AS distance
               FROM knn
               JOIN knowledge_facts ON knowledge_facts.id = knn.fact_id
               ORDER BY knn.distance, confidence DESC, last_seen DESC, id
               LIMIT ?"#
        ))
        .bind(vec_to_blob(query))
        .bind(window.size() as i64)
        .bind(k as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let distance: f64 = row.try_get("distance").map_err(query_error)?;
                Ok(ScoredFact {
                    score: vector::score(distance),
                    fact: FactRow::from_row(row).map_err(query_error)?.into_fact()?,
                })
            })
            .collect()
    }

    async fn count_facts(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_facts")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(count as u64)
    }
}
