//! sqlite-vec KNN indexes for messages, facts and digests.
//!
//! Each layer keeps one `vec0` virtual table per embedding dimension,
//! created lazily by the first write of that dimension. A query searches
//! only the table matching its own length, so vectors produced by a model
//! with a different dimension are never compared. The canonical vector
//! stays in the owning row's `embedding` BLOB; the `vec0` tables are the
//! searchable copy and are written in the same transaction.

use std::sync::Once;

use sqlx::sqlite::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use strata_core::embedding::vector::vec_to_blob;
use strata_types::error::RepositoryError;

use super::query_error;

/// Largest `k` a `vec0` KNN query accepts.
pub const MAX_KNN: usize = 4096;

static INIT: Once = Once::new();

/// Register sqlite-vec with every SQLite connection opened afterwards.
///
/// `sqlite3_auto_extension` is process-global, so this must run before the
/// pools connect. Safe to call repeatedly.
pub fn init_vector_extension() {
    INIT.call_once(|| {
        use libsqlite3_sys::sqlite3_auto_extension;
        use sqlite_vec::sqlite3_vec_init;

        unsafe {
            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        }
        tracing::debug!("sqlite-vec extension registered");
    });
}

/// Which layer a `vec0` table indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorIndex {
    Messages,
    Facts,
    Digests,
}

impl VectorIndex {
    fn prefix(self) -> &'static str {
        match self {
            VectorIndex::Messages => "message_vectors",
            VectorIndex::Facts => "fact_vectors",
            VectorIndex::Digests => "digest_vectors",
        }
    }

    /// Primary key column of the `vec0` table.
    pub fn key(self) -> &'static str {
        match self {
            VectorIndex::Messages => "message_id",
            VectorIndex::Facts => "fact_id",
            VectorIndex::Digests => "digest_id",
        }
    }

    pub fn table(self, dimension: usize) -> String {
        format!("{}_{dimension}", self.prefix())
    }
}

/// Store or replace the indexed vector for `id`.
pub async fn upsert(
    conn: &mut SqliteConnection,
    index: VectorIndex,
    id: &Uuid,
    vector: &[f32],
) -> Result<(), RepositoryError> {
    if vector.is_empty() {
        return Err(RepositoryError::Query("cannot index an empty vector".into()));
    }
    let table = index.table(vector.len());
    let key = index.key();

    sqlx::query(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {table} USING vec0(\
         {key} TEXT PRIMARY KEY, embedding float[{}] distance_metric=cosine)",
        vector.len()
    ))
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    // vec0 has no INSERT OR REPLACE.
    sqlx::query(&format!("DELETE FROM {table} WHERE {key} = ?"))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;

    sqlx::query(&format!("INSERT INTO {table} ({key}, embedding) VALUES (?, ?)"))
        .bind(id.to_string())
        .bind(vec_to_blob(vector))
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    Ok(())
}

/// Drop `id` from every dimension's table of `index`.
pub async fn remove(
    conn: &mut SqliteConnection,
    index: VectorIndex,
    id: &Uuid,
) -> Result<(), RepositoryError> {
    let tables: Vec<String> = sqlx::query_scalar(
        r#"SELECT name FROM sqlite_master
           WHERE type = 'table' AND sql LIKE 'CREATE VIRTUAL TABLE%' AND name LIKE ? || '\_%' ESCAPE '\'"#,
    )
    .bind(index.prefix())
    .fetch_all(&mut *conn)
    .await
    .map_err(query_error)?;

    for table in tables {
        sqlx::query(&format!("DELETE FROM {table} WHERE {} = ?", index.key()))
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(query_error)?;
    }
    Ok(())
}

/// The table to search for `dimension`, with its row count.
///
/// `None` when nothing of that dimension was ever indexed.
pub async fn searchable(
    pool: &SqlitePool,
    index: VectorIndex,
    dimension: usize,
) -> Result<Option<(String, usize)>, RepositoryError> {
    if dimension == 0 {
        return Ok(None);
    }
    let table = index.table(dimension);
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&table)
            .fetch_optional(pool)
            .await
            .map_err(query_error)?;
    if exists.is_none() {
        return Ok(None);
    }

    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(query_error)?;
    if count == 0 {
        return Ok(None);
    }
    Ok(Some((table, count as usize)))
}

/// Cosine distance from `vec0` back to a similarity score.
pub fn score(distance: f64) -> f32 {
    (1.0 - distance) as f32
}

/// KNN fetch size for a query that filters rows after the vector search.
///
/// Starts at four times `k` and grows until `k` rows survive the filters or
/// the window covers every indexed vector `vec0` can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnnWindow {
    size: usize,
    limit: usize,
}

impl KnnWindow {
    pub fn new(k: usize, indexed: usize) -> Self {
        let limit = indexed.clamp(1, MAX_KNN);
        Self {
            size: k.saturating_mul(4).clamp(1, limit),
            limit,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow the window. `false` once it cannot grow any further.
    pub fn widen(&mut self) -> bool {
        if self.size >= self.limit {
            return false;
        }
        self.size = self.size.saturating_mul(4).min(self.limit);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;

    #[test]
    fn window_grows_to_the_indexed_count() {
        let mut window = KnnWindow::new(5, 100);
        assert_eq!(window.size(), 20);
        assert!(window.widen());
        assert_eq!(window.size(), 80);
        assert!(window.widen());
        assert_eq!(window.size(), 100);
        assert!(!window.widen());
    }

    #[test]
    fn window_is_capped_by_vec0() {
        let mut window = KnnWindow::new(100, 1_000_000);
        while window.widen() {}
        assert_eq!(window.size(), MAX_KNN);
        assert_eq!(KnnWindow::new(10, 3).size(), 3);
    }

    #[test]
    fn table_names_carry_the_dimension() {
        assert_eq!(VectorIndex::Messages.table(64), "message_vectors_64");
        assert_eq!(VectorIndex::Digests.key(), "digest_id");
    }

    #[tokio::test]
    async fn upsert_replaces_and_remove_clears_every_dimension() {
        let pool = test_pool().await;
        let id = Uuid::now_v7();
        let mut conn = pool.writer.acquire().await.unwrap();

        upsert(&mut conn, VectorIndex::Facts, &id, &[1.0, 0.0, 0.0]).await.unwrap();
        upsert(&mut conn, VectorIndex::Facts, &id, &[0.0, 1.0, 0.0]).await.unwrap();
        upsert(&mut conn, VectorIndex::Facts, &id, &[1.0, 0.0]).await.unwrap();
        drop(conn);

        let (table, count) = searchable(&pool.reader, VectorIndex::Facts, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((table.as_str(), count), ("fact_vectors_3", 1));
        assert!(searchable(&pool.reader, VectorIndex::Facts, 8).await.unwrap().is_none());

        let mut conn = pool.writer.acquire().await.unwrap();
        remove(&mut conn, VectorIndex::Facts, &id).await.unwrap();
        drop(conn);
        assert!(searchable(&pool.reader, VectorIndex::Facts, 3).await.unwrap().is_none());
        assert!(searchable(&pool.reader, VectorIndex::Facts, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_vectors_are_rejected() {
        let pool = test_pool().await;
        let mut conn = pool.writer.acquire().await.unwrap();
        let err = upsert(&mut conn, VectorIndex::Messages, &Uuid::now_v7(), &[]).await;
        assert!(matches!(err, Err(RepositoryError::Query(_))));
    }
}
