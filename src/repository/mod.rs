//! Read-side repositories the executor depends on.
//!
//! Schedules are created and mutated by the external API layer; the scheduler
//! only ever reads them. Snapshots are append-only, with only the newest row
//! ever read back.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

use async_trait::async_trait;
use thiserror::Error;

use crate::schedule::Schedule;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Message(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Read access to the persisted schedule set.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// All schedules regardless of active state; callers filter.
    async fn get_all(&self) -> RepositoryResult<Vec<Schedule>>;
}

/// Append-only store of watermark snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn create_snapshot(&self, blob: Vec<u8>) -> RepositoryResult<()>;

    /// Most recent snapshot by insertion order, if one exists yet.
    async fn latest_snapshot(&self) -> RepositoryResult<Option<Vec<u8>>>;
}
