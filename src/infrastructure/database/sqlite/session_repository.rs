use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::StoreError;
use crate::domain::models::{QueueMode, Session, SessionId, TaskId, ThinkingLevel};
use crate::domain::ports::SessionRepository;

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    created_at: String,
    last_activity: String,
    compaction_count: i64,
    total_tokens_used: i64,
    queue_mode: String,
    active_channel_id: Option<String>,
    current_task_id: Option<String>,
    thinking_level: Option<String>,
    flags: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: SessionId::parse(&row.id)?,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc),
            last_activity: DateTime::parse_from_rfc3339(&row.last_activity)?.with_timezone(&Utc),
            compaction_count: row.compaction_count as u32,
            total_tokens_used: row.total_tokens_used as u64,
            queue_mode: QueueMode::from_str(&row.queue_mode).unwrap_or_default(),
            active_channel_id: row.active_channel_id,
            current_task_id: row.current_task_id.map(|s| TaskId::parse(&s)).transpose()?,
            thinking_level: row.thinking_level.and_then(|t| match t.as_str() {
                "low" => Some(ThinkingLevel::Low),
                "medium" => Some(ThinkingLevel::Medium),
                "high" => Some(ThinkingLevel::High),
                _ => None,
            }),
            flags: serde_json::from_str(&row.flags)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn thinking_level_str(level: &Option<ThinkingLevel>) -> Option<&'static str> {
    level.map(|l| match l {
        ThinkingLevel::Low => "low",
        ThinkingLevel::Medium => "medium",
        ThinkingLevel::High => "high",
    })
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let flags_json = serde_json::to_string(&session.flags)?;
        sqlx::query(
            r"INSERT INTO sessions (id, created_at, last_activity, compaction_count, total_tokens_used,
               queue_mode, active_channel_id, current_task_id, thinking_level, flags)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity.to_rfc3339())
        .bind(session.compaction_count as i64)
        .bind(session.total_tokens_used as i64)
        .bind(session.queue_mode.as_str())
        .bind(&session.active_channel_id)
        .bind(session.current_task_id.map(|id| id.to_string()))
        .bind(thinking_level_str(&session.thinking_level))
        .bind(&flags_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Session::try_from).transpose()
    }

    async fn update(&self, session: &Session) -> Result<(), StoreError> {
        let flags_json = serde_json::to_string(&session.flags)?;
        sqlx::query(
            r"UPDATE sessions SET last_activity = ?, compaction_count = ?, total_tokens_used = ?,
               queue_mode = ?, active_channel_id = ?, current_task_id = ?, thinking_level = ?, flags = ?
               WHERE id = ?",
        )
        .bind(session.last_activity.to_rfc3339())
        .bind(session.compaction_count as i64)
        .bind(session.total_tokens_used as i64)
        .bind(session.queue_mode.as_str())
        .bind(&session.active_channel_id)
        .bind(session.current_task_id.map(|id| id.to_string()))
        .bind(thinking_level_str(&session.thinking_level))
        .bind(&flags_json)
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_active_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE last_activity >= ? ORDER BY last_activity DESC")
            .bind(since.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Session::try_from).collect()
    }
}
