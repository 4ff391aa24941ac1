//! Postgres-backed schedule and snapshot repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{RepositoryError, RepositoryResult, ScheduleRepository, SnapshotRepository};
use crate::schedule::{RateUnit, Schedule, ScheduleKind};

/// Shared handle over the scheduler tables.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect and run migrations.
    pub async fn connect(database_url: &str) -> RepositoryResult<Self> {
        Self::connect_with_pool_size(database_url, 10).await
    }

    pub async fn connect_with_pool_size(
        database_url: &str,
        max_connections: u32,
    ) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct ScheduleRow {
    project: String,
    domain: String,
    name: String,
    version: String,
    cron_expression: Option<String>,
    fixed_rate_value: Option<i32>,
    fixed_rate_unit: Option<String>,
    kickoff_time_input_arg: String,
    active: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = RepositoryError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let kind = match (&row.cron_expression, row.fixed_rate_value) {
            (Some(expression), _) => ScheduleKind::Cron {
                expression: expression.clone(),
            },
            (None, Some(amount)) => {
                let unit = row
                    .fixed_rate_unit
                    .as_deref()
                    .and_then(RateUnit::parse)
                    .ok_or_else(|| {
                        RepositoryError::Message(format!(
                            "schedule {}/{}/{}/{} has invalid fixed rate unit {:?}",
                            row.project, row.domain, row.name, row.version, row.fixed_rate_unit
                        ))
                    })?;
                ScheduleKind::FixedRate {
                    amount: amount.max(0) as u32,
                    unit,
                }
            }
            (None, None) => {
                return Err(RepositoryError::Message(format!(
                    "schedule {}/{}/{}/{} has neither a cron expression nor a fixed rate",
                    row.project, row.domain, row.name, row.version
                )))
            }
        };

        Ok(Schedule {
            project: row.project,
            domain: row.domain,
            name: row.name,
            version: row.version,
            kind,
            kickoff_time_input_arg: row.kickoff_time_input_arg,
            active: row.active,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ScheduleRepository for PostgresRepository {
    async fn get_all(&self) -> RepositoryResult<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT project, domain, name, version, cron_expression, fixed_rate_value,
                   fixed_rate_unit, kickoff_time_input_arg, active, updated_at
            FROM schedulable_entities
            ORDER BY project, domain, name, version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Schedule::try_from).collect()
    }
}

#[async_trait]
impl SnapshotRepository for PostgresRepository {
    async fn create_snapshot(&self, blob: Vec<u8>) -> RepositoryResult<()> {
        sqlx::query("INSERT INTO schedule_snapshots (snapshot) VALUES ($1)")
            .bind(blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_snapshot(&self) -> RepositoryResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT snapshot FROM schedule_snapshots ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("snapshot")))
    }
}
