//! Metronome - a persistent workflow scheduler.
//!
//! Reads launch-plan schedules from the database and fires exactly one
//! execution-create request at the admin service for every scheduled
//! instant. Progress is tracked as a per-schedule watermark, periodically
//! snapshotted, so a restart replays missed instants instead of losing or
//! double-firing them.
//!
//! ## Key components
//!
//! - [`executor::WorkflowExecutor`]: boot, catch-up, reconcile, checkpoint
//! - [`trigger::Trigger`] / [`registry::TriggerRegistry`]: instant
//!   enumeration and live per-schedule tickers
//! - [`dispatch::Dispatcher`]: deterministic, idempotent execution
//!   submission with bounded retry
//! - [`snapshot`] / [`watermark`]: versioned persistence of dispatch
//!   progress

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod limiter;
pub mod metrics;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod schedule;
pub mod snapshot;
pub mod trigger;
pub mod watermark;

pub use admin::{AdminClient, GrpcAdminClient};
pub use config::Config;
pub use dispatch::{Dispatcher, FailurePolicy};
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use metrics::SchedulerMetrics;
pub use repository::{
    MemoryRepository, PostgresRepository, ScheduleRepository, SnapshotRepository,
};
pub use retry::RetryPolicy;
pub use schedule::{RateUnit, Schedule, ScheduleKind};
pub use watermark::WatermarkTable;
