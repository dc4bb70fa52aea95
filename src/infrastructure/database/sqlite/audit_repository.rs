use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::models::AuditEntry;
use crate::domain::ports::AuditRepository;

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    actor: String,
    action: String,
    subject: Option<String>,
    detail: String,
    recorded_at: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: Uuid::parse_str(&row.id)?,
            actor: row.actor,
            action: row.action,
            subject: row.subject,
            detail: serde_json::from_str(&row.detail)?,
            recorded_at: DateTime::parse_from_rfc3339(&row.recorded_at)?.with_timezone(&Utc),
        })
    }
}

/// Append-only audit log. No update or delete is exposed, matching the
/// entity's invariant that entries are never mutated after insert.
#[derive(Clone)]
pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let detail_json = serde_json::to_string(&entry.detail)?;
        sqlx::query(
            r"INSERT INTO audit_log (id, actor, action, subject, detail, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.subject)
        .bind(&detail_json)
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> =
            sqlx::query_as("SELECT * FROM audit_log WHERE recorded_at >= ? ORDER BY recorded_at ASC")
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
