use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::domain::errors::StoreError;
use crate::domain::models::{ChainValidation, Message, MessageContent, MessageId, Role, SessionId};
use crate::domain::ports::MessageRepository;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    parent_message_id: Option<String>,
    role: String,
    content: String,
    created_at: String,
    token_count: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::parse(&row.id)?,
            session_id: SessionId::parse(&row.session_id)?,
            parent_message_id: row.parent_message_id.map(|s| MessageId::parse(&s)).transpose()?,
            role: Role::from_str(&row.role).ok_or_else(|| StoreError::ConstraintViolation(format!("unknown role {}", row.role)))?,
            content: serde_json::from_str::<MessageContent>(&row.content)?,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc),
            token_count: row.token_count.map(|t| t as u32),
        })
    }
}

#[derive(Clone)]
pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let content_json = serde_json::to_string(&message.content)?;
        sqlx::query(
            r"INSERT INTO messages (id, session_id, parent_message_id, role, content, created_at, token_count)
               VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.session_id.to_string())
        .bind(message.parent_message_id.map(|id| id.to_string()))
        .bind(message.role.as_str())
        .bind(&content_json)
        .bind(message.created_at.to_rfc3339())
        .bind(message.token_count.map(|t| t as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Message::try_from).transpose()
    }

    async fn list_for_session(&self, session_id: SessionId, limit: Option<u32>) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(session_id.to_string())
        .bind(i64::from(limit.unwrap_or(u32::MAX)))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    /// Walk the session's parent-link chain looking for a cycle or a
    /// reference to a message outside the session.
    async fn validate_chain(&self, session_id: SessionId) -> Result<ChainValidation, StoreError> {
        let messages = self.list_for_session(session_id, None).await?;
        let known: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();

        for message in &messages {
            if let Some(parent) = message.parent_message_id {
                if !known.contains(&parent) {
                    return Ok(ChainValidation { valid: false, broken_at: Some(message.id) });
                }
            }
        }

        let mut visited_all = HashSet::new();
        for message in &messages {
            let mut visited_this_walk = HashSet::new();
            let mut cursor = Some(message.id);
            while let Some(id) = cursor {
                if !visited_this_walk.insert(id) {
                    return Ok(ChainValidation { valid: false, broken_at: Some(message.id) });
                }
                if visited_all.contains(&id) {
                    break;
                }
                cursor = messages.iter().find(|m| m.id == id).and_then(|m| m.parent_message_id);
            }
            visited_all.extend(visited_this_walk);
        }

        Ok(ChainValidation { valid: true, broken_at: None })
    }

    async fn delete_for_session(&self, session_id: SessionId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_token_count(&self, session_id: SessionId) -> Result<u64, StoreError> {
        let (total,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(token_count), 0) FROM messages WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(total as u64)
    }
}
