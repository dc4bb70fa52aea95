//! Persistence infrastructure: SQLite connection management, versioned
//! migrations, and repository implementations.

pub mod connection;
pub mod migrations;
pub mod sqlite;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};

/// Bundles one SQLite-backed implementation of every repository port,
/// constructed from a single pool.
#[derive(Clone)]
pub struct SqliteStore {
    pub sessions: sqlite::SqliteSessionRepository,
    pub messages: sqlite::SqliteMessageRepository,
    pub tasks: sqlite::SqliteTaskRepository,
    pub subagents: sqlite::SqliteSubagentRepository,
    pub approvals: sqlite::SqliteApprovalRepository,
    pub schedules: sqlite::SqliteScheduleRepository,
    pub state: sqlite::SqliteStateRepository,
    pub memory: sqlite::SqliteMemoryRepository,
    pub audit: sqlite::SqliteAuditRepository,
}

impl SqliteStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            sessions: sqlite::SqliteSessionRepository::new(pool.clone()),
            messages: sqlite::SqliteMessageRepository::new(pool.clone()),
            tasks: sqlite::SqliteTaskRepository::new(pool.clone()),
            subagents: sqlite::SqliteSubagentRepository::new(pool.clone()),
            approvals: sqlite::SqliteApprovalRepository::new(pool.clone()),
            schedules: sqlite::SqliteScheduleRepository::new(pool.clone()),
            state: sqlite::SqliteStateRepository::new(pool.clone()),
            memory: sqlite::SqliteMemoryRepository::new(pool.clone()),
            audit: sqlite::SqliteAuditRepository::new(pool),
        }
    }

    /// Open a pool at `database_url`, run embedded migrations, and wrap it.
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        let pool = connection::create_pool(database_url, None).await?;
        let migrator = Migrator::new(pool.clone());
        migrator.run_embedded_migrations(all_embedded_migrations()).await?;
        Ok(Self::new(pool))
    }

    /// Open an in-memory pool with migrations applied, for tests.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = connection::create_test_pool().await?;
        let migrator = Migrator::new(pool.clone());
        migrator.run_embedded_migrations(all_embedded_migrations()).await?;
        Ok(Self::new(pool))
    }
}
