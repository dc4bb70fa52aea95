use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::StoreError;
use crate::domain::models::{SessionId, SubagentId, SubagentRecord, SubagentStatus};
use crate::domain::ports::SubagentRepository;

#[derive(sqlx::FromRow)]
struct SubagentRow {
    id: String,
    agent_name: String,
    parent_subagent_id: Option<String>,
    task_description: String,
    os_pid: Option<i64>,
    status: String,
    spawned_at: String,
    completed_at: Option<String>,
    timeout_ms: i64,
    result_text: Option<String>,
    tokens_used: Option<i64>,
    tool_uses: Option<i64>,
    session_id: Option<String>,
}

impl TryFrom<SubagentRow> for SubagentRecord {
    type Error = StoreError;

    fn try_from(row: SubagentRow) -> Result<Self, Self::Error> {
        Ok(SubagentRecord {
            id: SubagentId::parse(&row.id)?,
            agent_name: row.agent_name,
            parent_subagent_id: row.parent_subagent_id.map(|s| SubagentId::parse(&s)).transpose()?,
            task_description: row.task_description,
            os_pid: row.os_pid.map(|v| v as u32),
            status: SubagentStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::ConstraintViolation(format!("unknown subagent status {}", row.status)))?,
            spawned_at: DateTime::parse_from_rfc3339(&row.spawned_at)?.with_timezone(&Utc),
            completed_at: row
                .completed_at
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                .transpose()?,
            timeout_ms: row.timeout_ms as u64,
            result_text: row.result_text,
            tokens_used: row.tokens_used.map(|v| v as u64),
            tool_uses: row.tool_uses.map(|v| v as u32),
            session_id: row.session_id.map(|s| SessionId::parse(&s)).transpose()?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteSubagentRepository {
    pool: SqlitePool,
}

impl SqliteSubagentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubagentRepository for SqliteSubagentRepository {
    async fn create(&self, record: &SubagentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO subagents (id, agent_name, parent_subagent_id, task_description, os_pid, status,
               spawned_at, completed_at, timeout_ms, result_text, tokens_used, tool_uses, session_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.agent_name)
        .bind(record.parent_subagent_id.map(|id| id.to_string()))
        .bind(&record.task_description)
        .bind(record.os_pid.map(i64::from))
        .bind(record.status.as_str())
        .bind(record.spawned_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.timeout_ms as i64)
        .bind(&record.result_text)
        .bind(record.tokens_used.map(|v| v as i64))
        .bind(record.tool_uses.map(i64::from))
        .bind(record.session_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: SubagentId) -> Result<Option<SubagentRecord>, StoreError> {
        let row: Option<SubagentRow> = sqlx::query_as("SELECT * FROM subagents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SubagentRecord::try_from).transpose()
    }

    async fn update(&self, record: &SubagentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"UPDATE subagents SET os_pid = ?, status = ?, completed_at = ?, result_text = ?,
               tokens_used = ?, tool_uses = ? WHERE id = ?",
        )
        .bind(record.os_pid.map(i64::from))
        .bind(record.status.as_str())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(&record.result_text)
        .bind(record.tokens_used.map(|v| v as i64))
        .bind(record.tool_uses.map(i64::from))
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<SubagentRecord>, StoreError> {
        let rows: Vec<SubagentRow> = sqlx::query_as("SELECT * FROM subagents WHERE status = 'running' ORDER BY spawned_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SubagentRecord::try_from).collect()
    }

    async fn list_children(&self, parent: SubagentId) -> Result<Vec<SubagentRecord>, StoreError> {
        let rows: Vec<SubagentRow> =
            sqlx::query_as("SELECT * FROM subagents WHERE parent_subagent_id = ? ORDER BY spawned_at ASC")
                .bind(parent.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(SubagentRecord::try_from).collect()
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
    async fn create_then_update_to_completed() {
        let pool = setup().await;
        let repo = SqliteSubagentRepository::new(pool);
        let mut record = SubagentRecord::new("researcher", "find bugs", 60_000);
        repo.create(&record).await.unwrap();

        record.complete("done", 42, 3);
        repo.update(&record).await.unwrap();

        let fetched = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SubagentStatus::Completed);
        assert_eq!(fetched.tokens_used, Some(42));
    }

    #[tokio::test]
    async fn list_children_filters_by_parent() {
        let pool = setup().await;
        let repo = SqliteSubagentRepository::new(pool);
        let parent = SubagentRecord::new("lead", "coordinate", 60_000);
        repo.create(&parent).await.unwrap();
        let child = SubagentRecord::new("worker", "do a piece", 60_000).with_parent(parent.id);
        repo.create(&child).await.unwrap();

        let children = repo.list_children(parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }
}
