use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use crate::domain::errors::StoreError;
use crate::domain::models::{Task, TaskId, TaskStatus};
use crate::domain::ports::TaskRepository;

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    subject: String,
    description: String,
    active_form: String,
    status: String,
    owner: Option<String>,
    blocked_by: String,
    blocks: String,
    metadata: String,
    time_budget_ms: Option<i64>,
    verify_command: Option<String>,
    failure_context: String,
    retry_count: i64,
    created_at: String,
    updated_at: String,
}

fn parse_id_set(json: &str) -> Result<BTreeSet<TaskId>, StoreError> {
    let raw: Vec<String> = serde_json::from_str(json)?;
    raw.iter().map(|s| TaskId::parse(s).map_err(StoreError::from)).collect()
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: TaskId::parse(&row.id)?,
            subject: row.subject,
            description: row.description,
            active_form: row.active_form,
            status: TaskStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::ConstraintViolation(format!("unknown task status {}", row.status)))?,
            owner: row.owner,
            blocked_by: parse_id_set(&row.blocked_by)?,
            blocks: parse_id_set(&row.blocks)?,
            metadata: serde_json::from_str(&row.metadata)?,
            time_budget_ms: row.time_budget_ms.map(|v| v as u64),
            verify_command: row.verify_command,
            failure_context: row.failure_context,
            retry_count: row.retry_count as u32,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)?.with_timezone(&Utc),
        })
    }
}

fn id_set_json(ids: &BTreeSet<TaskId>) -> Result<String, StoreError> {
    let raw: Vec<String> = ids.iter().map(std::string::ToString::to_string).collect();
    Ok(serde_json::to_string(&raw)?)
}

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let blocked_by_json = id_set_json(&task.blocked_by)?;
        let blocks_json = id_set_json(&task.blocks)?;
        let metadata_json = serde_json::to_string(&task.metadata)?;

        sqlx::query(
            r"INSERT INTO tasks (id, subject, description, active_form, status, owner, blocked_by, blocks,
               metadata, time_budget_ms, verify_command, failure_context, retry_count, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(&task.subject)
        .bind(&task.description)
        .bind(&task.active_form)
        .bind(task.status.as_str())
        .bind(&task.owner)
        .bind(&blocked_by_json)
        .bind(&blocks_json)
        .bind(&metadata_json)
        .bind(task.time_budget_ms.map(|v| v as i64))
        .bind(&task.verify_command)
        .bind(&task.failure_context)
        .bind(task.retry_count as i64)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let blocked_by_json = id_set_json(&task.blocked_by)?;
        let blocks_json = id_set_json(&task.blocks)?;
        let metadata_json = serde_json::to_string(&task.metadata)?;

        sqlx::query(
            r"UPDATE tasks SET subject = ?, description = ?, active_form = ?, status = ?, owner = ?,
               blocked_by = ?, blocks = ?, metadata = ?, time_budget_ms = ?, verify_command = ?,
               failure_context = ?, retry_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&task.subject)
        .bind(&task.description)
        .bind(&task.active_form)
        .bind(task.status.as_str())
        .bind(&task.owner)
        .bind(&blocked_by_json)
        .bind(&blocks_json)
        .bind(&metadata_json)
        .bind(task.time_budget_ms.map(|v| v as i64))
        .bind(&task.verify_command)
        .bind(&task.failure_context)
        .bind(task.retry_count as i64)
        .bind(task.updated_at.to_rfc3339())
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn list_ready(&self) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE status = 'pending' AND blocked_by = '[]' ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn list_all(&self) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks ORDER BY created_at ASC").fetch_all(&self.pool).await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn add_dependency(&self, task_id: TaskId, dep_id: TaskId) -> Result<(), StoreError> {
        let Some(mut task) = self.get(task_id).await? else {
            return Err(StoreError::NotFound(format!("task {task_id} not found")));
        };
        task.blocked_by.insert(dep_id);
        task.touch();
        self.update(&task).await
    }

    async fn remove_dependency(&self, task_id: TaskId, dep_id: TaskId) -> Result<(), StoreError> {
        let Some(mut task) = self.get(task_id).await? else {
            return Err(StoreError::NotFound(format!("task {task_id} not found")));
        };
        task.blocked_by.remove(&dep_id);
        task.touch();
        self.update(&task).await
    }

    async fn clear_owner(&self, task_id: TaskId) -> Result<(), StoreError> {
        sqlx::query("UPDATE tasks SET owner = NULL WHERE id = ?")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_blocked(&self) -> Result<Vec<Task>, StoreError> {
        self.list_by_status(TaskStatus::Blocked).await
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
    async fn create_then_get_round_trips_dependency_sets() {
        let pool = setup().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut task = Task::new("Write tests", "cover the repository");
        task.blocked_by.insert(TaskId::new());

        repo.create(&task).await.unwrap();
        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.blocked_by, task.blocked_by);
        assert_eq!(fetched.active_form, "Writing tests");
    }

    #[tokio::test]
    async fn list_ready_excludes_blocked_tasks() {
        let pool = setup().await;
        let repo = SqliteTaskRepository::new(pool);

        let free_task = Task::new("Free task", "no deps");
        let mut blocked_task = Task::new("Blocked task", "has a dep");
        blocked_task.blocked_by.insert(TaskId::new());

        repo.create(&free_task).await.unwrap();
        repo.create(&blocked_task).await.unwrap();

        let ready = repo.list_ready().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, free_task.id);
    }

    #[tokio::test]
    async fn add_and_remove_dependency_update_blocked_by() {
        let pool = setup().await;
        let repo = SqliteTaskRepository::new(pool);
        let dep = Task::new("Dep", "dep");
        let task = Task::new("Task", "task");
        repo.create(&dep).await.unwrap();
        repo.create(&task).await.unwrap();

        repo.add_dependency(task.id, dep.id).await.unwrap();
        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert!(fetched.blocked_by.contains(&dep.id));

        repo.remove_dependency(task.id, dep.id).await.unwrap();
        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert!(!fetched.blocked_by.contains(&dep.id));
    }

    #[tokio::test]
    async fn clear_owner_nulls_the_owner_column() {
        let pool = setup().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut task = Task::new("Task", "task");
        task.owner = Some("alice".to_string());
        repo.create(&task).await.unwrap();

        repo.clear_owner(task.id).await.unwrap();
        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.owner, None);
    }

    #[tokio::test]
    async fn get_blocked_returns_only_blocked_tasks() {
        let pool = setup().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut blocked = Task::new("Blocked", "b");
        blocked.status = TaskStatus::Blocked;
        let free = Task::new("Free", "f");
        repo.create(&blocked).await.unwrap();
        repo.create(&free).await.unwrap();

        let result = repo.get_blocked().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, blocked.id);
    }

    #[tokio::test]
    async fn update_persists_status_transition() {
        let pool = setup().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut task = Task::new("Subject", "description");
        repo.create(&task).await.unwrap();

        task.status = TaskStatus::InProgress;
        task.touch();
        repo.update(&task).await.unwrap();

        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::InProgress);
    }
}
