use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::StoreError;
use crate::domain::models::{Schedule, ScheduleId, ScheduleKind, SessionId};
use crate::domain::ports::ScheduleRepository;

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    session_id: String,
    kind: String,
    cron_expr: Option<String>,
    prompt: String,
    next_fire_at: String,
    last_fired_at: Option<String>,
    enabled: i64,
    created_at: String,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(Schedule {
            id: ScheduleId::parse(&row.id)?,
            session_id: SessionId::parse(&row.session_id)?,
            kind: match row.kind.as_str() {
                "once" => ScheduleKind::Once,
                "recurring" => ScheduleKind::Recurring,
                other => return Err(StoreError::ConstraintViolation(format!("unknown schedule kind {other}"))),
            },
            cron_expr: row.cron_expr,
            prompt: row.prompt,
            next_fire_at: DateTime::parse_from_rfc3339(&row.next_fire_at)?.with_timezone(&Utc),
            last_fired_at: row
                .last_fired_at
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                .transpose()?,
            enabled: row.enabled != 0,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc),
        })
    }
}

fn kind_str(kind: ScheduleKind) -> &'static str {
    match kind {
        ScheduleKind::Once => "once",
        ScheduleKind::Recurring => "recurring",
    }
}

#[derive(Clone)]
pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn create(&self, schedule: &Schedule) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO schedules (id, session_id, kind, cron_expr, prompt, next_fire_at, last_fired_at,
               enabled, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(schedule.id.to_string())
        .bind(schedule.session_id.to_string())
        .bind(kind_str(schedule.kind))
        .bind(&schedule.cron_expr)
        .bind(&schedule.prompt)
        .bind(schedule.next_fire_at.to_rfc3339())
        .bind(schedule.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(schedule.enabled))
        .bind(schedule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as("SELECT * FROM schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Schedule::try_from).transpose()
    }

    async fn update(&self, schedule: &Schedule) -> Result<(), StoreError> {
        sqlx::query(
            r"UPDATE schedules SET next_fire_at = ?, last_fired_at = ?, enabled = ? WHERE id = ?",
        )
        .bind(schedule.next_fire_at.to_rfc3339())
        .bind(schedule.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(schedule.enabled))
        .bind(schedule.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: ScheduleId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM schedules WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, StoreError> {
        let rows: Vec<ScheduleRow> =
            sqlx::query_as("SELECT * FROM schedules WHERE enabled = 1 AND next_fire_at <= ? ORDER BY next_fire_at ASC")
                .bind(now.to_rfc3339())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Schedule::try_from).collect()
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
    async fn list_due_only_returns_elapsed_enabled_schedules() {
        let pool = setup().await;
        let repo = SqliteScheduleRepository::new(pool);
        let now = Utc::now();

        let due = Schedule::once(SessionId::new(), "fire now", now - chrono::Duration::seconds(1));
        let future = Schedule::once(SessionId::new(), "fire later", now + chrono::Duration::hours(1));
        repo.create(&due).await.unwrap();
        repo.create(&future).await.unwrap();

        let due_list = repo.list_due(now).await.unwrap();
        assert_eq!(due_list.len(), 1);
        assert_eq!(due_list[0].id, due.id);
    }

    #[tokio::test]
    async fn update_can_disable_a_schedule() {
        let pool = setup().await;
        let repo = SqliteScheduleRepository::new(pool);
        let mut schedule = Schedule::once(SessionId::new(), "once", Utc::now());
        repo.create(&schedule).await.unwrap();

        schedule.record_fire(Utc::now(), None);
        repo.update(&schedule).await.unwrap();

        let fetched = repo.get(schedule.id).await.unwrap().unwrap();
        assert!(!fetched.enabled);
    }
}
