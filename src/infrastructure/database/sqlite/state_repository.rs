use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::StoreError;
use crate::domain::ports::StateRepository;

/// Small opaque key/value store, e.g. channel cursors or feature flags
/// that do not warrant a dedicated entity.
#[derive(Clone)]
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateRepository for SqliteStateRepository {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_state WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv_state (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_state WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
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
    async fn set_then_get_round_trips() {
        let pool = setup().await;
        let repo = SqliteStateRepository::new(pool);
        repo.set("channel", "slack-cursor", "1234").await.unwrap();
        assert_eq!(repo.get("channel", "slack-cursor").await.unwrap().as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn set_overwrites_existing_value() {
        let pool = setup().await;
        let repo = SqliteStateRepository::new(pool);
        repo.set("ns", "k", "v1").await.unwrap();
        repo.set("ns", "k", "v2").await.unwrap();
        assert_eq!(repo.get("ns", "k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let pool = setup().await;
        let repo = SqliteStateRepository::new(pool);
        repo.set("ns", "k", "v").await.unwrap();
        repo.delete("ns", "k").await.unwrap();
        assert!(repo.get("ns", "k").await.unwrap().is_none());
    }
}
