use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::StoreError;
use crate::domain::models::{MemoryEntry, MemoryId};
use crate::domain::ports::MemoryRepository;

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: String,
    namespace: String,
    key: String,
    value: String,
    created_at: String,
    updated_at: String,
    embedding: Option<String>,
}

impl TryFrom<MemoryRow> for MemoryEntry {
    type Error = StoreError;

    fn try_from(row: MemoryRow) -> Result<Self, Self::Error> {
        Ok(MemoryEntry {
            id: MemoryId::parse(&row.id)?,
            namespace: row.namespace,
            key: row.key,
            value: row.value,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)?.with_timezone(&Utc),
        })
    }
}

/// Cosine distance (1 - cosine similarity) between two equal-length vectors.
/// Orthogonal/zero vectors are treated as maximally distant rather than
/// dividing by zero.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

#[derive(Clone)]
pub struct SqliteMemoryRepository {
    pool: SqlitePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryRepository for SqliteMemoryRepository {
    async fn upsert(&self, entry: &MemoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO memory_entries (id, namespace, key, value, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(entry.id.to_string())
        .bind(&entry.namespace)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<MemoryEntry>, StoreError> {
        let row: Option<MemoryRow> = sqlx::query_as("SELECT * FROM memory_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MemoryEntry::try_from).transpose()
    }

    async fn list_namespace(&self, namespace: &str) -> Result<Vec<MemoryEntry>, StoreError> {
        let rows: Vec<MemoryRow> = sqlx::query_as("SELECT * FROM memory_entries WHERE namespace = ? ORDER BY key ASC")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MemoryEntry::try_from).collect()
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM memory_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_with_embedding(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<(), StoreError> {
        let embedding_json = serde_json::to_string(embedding)?;
        sqlx::query(
            r"INSERT INTO memory_entries (id, namespace, key, value, created_at, updated_at, embedding)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(namespace, key) DO UPDATE SET
                   value = excluded.value, updated_at = excluded.updated_at, embedding = excluded.embedding",
        )
        .bind(entry.id.to_string())
        .bind(&entry.namespace)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .bind(embedding_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<MemoryEntry>, StoreError> {
        let rows: Vec<MemoryRow> = sqlx::query_as("SELECT * FROM memory_entries WHERE embedding IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let embedding_json = row.embedding.clone().expect("filtered to non-null embeddings");
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            let distance = cosine_distance(query_vector, &embedding);
            scored.push((distance, MemoryEntry::try_from(row)?));
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn compact(&self, older_than_ms: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(older_than_ms);
        let result = sqlx::query("DELETE FROM memory_entries WHERE updated_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::create_test_pool;
    use crate::infrastructure::database::migrations::{all_embedded_migrations, Migrator};

    async fn setup() -> SqlitePool {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_then_upsert_again_replaces_value() {
        let pool = setup().await;
        let repo = SqliteMemoryRepository::new(pool);
        let mut entry = MemoryEntry::new("user", "timezone", "UTC");
        repo.upsert(&entry).await.unwrap();

        entry.update_value("America/Los_Angeles");
        repo.upsert(&entry).await.unwrap();

        let fetched = repo.get("user", "timezone").await.unwrap().unwrap();
        assert_eq!(fetched.value, "America/Los_Angeles");
    }

    #[tokio::test]
    async fn list_namespace_filters_by_namespace() {
        let pool = setup().await;
        let repo = SqliteMemoryRepository::new(pool);
        repo.upsert(&MemoryEntry::new("user", "a", "1")).await.unwrap();
        repo.upsert(&MemoryEntry::new("user", "b", "2")).await.unwrap();
        repo.upsert(&MemoryEntry::new("project", "c", "3")).await.unwrap();

        let entries = repo.list_namespace("user").await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn search_ranks_nearest_embedding_first() {
        let pool = setup().await;
        let repo = SqliteMemoryRepository::new(pool);

        repo.store_with_embedding(&MemoryEntry::new("user", "likes-rust", "yes"), &[1.0, 0.0, 0.0]).await.unwrap();
        repo.store_with_embedding(&MemoryEntry::new("user", "likes-go", "yes"), &[0.0, 1.0, 0.0]).await.unwrap();
        repo.store_with_embedding(&MemoryEntry::new("user", "likes-zig", "maybe"), &[0.9, 0.1, 0.0]).await.unwrap();

        let results = repo.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "likes-rust");
        assert_eq!(results[1].key, "likes-zig");
    }

    #[tokio::test]
    async fn search_ignores_entries_without_an_embedding() {
        let pool = setup().await;
        let repo = SqliteMemoryRepository::new(pool);
        repo.upsert(&MemoryEntry::new("user", "timezone", "UTC")).await.unwrap();
        repo.store_with_embedding(&MemoryEntry::new("user", "likes-rust", "yes"), &[1.0, 0.0, 0.0]).await.unwrap();

        let results = repo.search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "likes-rust");
    }

    #[tokio::test]
    async fn compact_removes_only_entries_older_than_the_cutoff() {
        let pool = setup().await;
        let repo = SqliteMemoryRepository::new(pool);

        let mut stale = MemoryEntry::new("user", "stale", "old");
        stale.updated_at = Utc::now() - chrono::Duration::days(30);
        repo.upsert(&stale).await.unwrap();
        repo.upsert(&MemoryEntry::new("user", "fresh", "new")).await.unwrap();

        let removed = repo.compact(1_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get("user", "stale").await.unwrap().is_none());
        assert!(repo.get("user", "fresh").await.unwrap().is_some());
    }
}
