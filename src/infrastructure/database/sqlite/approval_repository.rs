use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::StoreError;
use crate::domain::models::{ApprovalId, ApprovalRequest, ApprovalStatus, SessionId};
use crate::domain::ports::ApprovalRepository;

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: String,
    tool_name: String,
    tool_input: String,
    reason: String,
    status: String,
    requested_at: String,
    decided_at: Option<String>,
    decided_by: Option<String>,
    expires_at: String,
    session_id: Option<String>,
}

impl TryFrom<ApprovalRow> for ApprovalRequest {
    type Error = StoreError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        Ok(ApprovalRequest {
            id: ApprovalId::parse(&row.id)?,
            tool_name: row.tool_name,
            tool_input: serde_json::from_str(&row.tool_input)?,
            reason: row.reason,
            status: ApprovalStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::ConstraintViolation(format!("unknown approval status {}", row.status)))?,
            requested_at: DateTime::parse_from_rfc3339(&row.requested_at)?.with_timezone(&Utc),
            decided_at: row
                .decided_at
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                .transpose()?,
            decided_by: row.decided_by,
            expires_at: DateTime::parse_from_rfc3339(&row.expires_at)?.with_timezone(&Utc),
            session_id: row.session_id.map(|s| SessionId::parse(&s)).transpose()?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteApprovalRepository {
    pool: SqlitePool,
}

impl SqliteApprovalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalRepository for SqliteApprovalRepository {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let tool_input_json = serde_json::to_string(&request.tool_input)?;
        sqlx::query(
            r"INSERT INTO approvals (id, tool_name, tool_input, reason, status, requested_at, decided_at,
               decided_by, expires_at, session_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request.id.to_string())
        .bind(&request.tool_name)
        .bind(&tool_input_json)
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.requested_at.to_rfc3339())
        .bind(request.decided_at.map(|t| t.to_rfc3339()))
        .bind(&request.decided_by)
        .bind(request.expires_at.to_rfc3339())
        .bind(request.session_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>, StoreError> {
        let row: Option<ApprovalRow> = sqlx::query_as("SELECT * FROM approvals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(ApprovalRequest::try_from).transpose()
    }

    async fn update(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        sqlx::query(
            r"UPDATE approvals SET status = ?, decided_at = ?, decided_by = ? WHERE id = ?",
        )
        .bind(request.status.as_str())
        .bind(request.decided_at.map(|t| t.to_rfc3339()))
        .bind(&request.decided_by)
        .bind(request.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows: Vec<ApprovalRow> =
            sqlx::query_as("SELECT * FROM approvals WHERE status = 'pending' ORDER BY requested_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ApprovalRequest::try_from).collect()
    }

    async fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows: Vec<ApprovalRow> =
            sqlx::query_as("SELECT * FROM approvals WHERE status = 'pending' AND expires_at <= ? ORDER BY expires_at ASC")
                .bind(now.to_rfc3339())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ApprovalRequest::try_from).collect()
    }
}
