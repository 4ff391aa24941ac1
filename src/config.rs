//! Environment-driven configuration for the scheduler service.

use std::env;

use anyhow::{Context, Result};

use crate::dispatch::FailurePolicy;
use crate::executor::ExecutorConfig;

/// Service configuration, one `METRONOME_*` variable per field:
/// - `METRONOME_DATABASE_URL`: PostgreSQL connection string (required)
/// - `METRONOME_ADMIN_ENDPOINT`: admin service gRPC endpoint (required)
/// - `METRONOME_ADMIN_FIRE_RATE_LIMIT`: execution-create requests per second
///   against the admin service (required)
/// - `METRONOME_SURFACE_DISPATCH_FAILURES`: set to `1`/`true` to make an
///   exhausted retry budget an error instead of silently advancing the
///   watermark past the failed instant
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub admin_endpoint: String,
    pub admin_fire_req_rate_limit: u32,
    pub surface_dispatch_failures: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("METRONOME_DATABASE_URL").context("METRONOME_DATABASE_URL must be set")?;

        let admin_endpoint =
            env::var("METRONOME_ADMIN_ENDPOINT").context("METRONOME_ADMIN_ENDPOINT must be set")?;

        let admin_fire_req_rate_limit = env::var("METRONOME_ADMIN_FIRE_RATE_LIMIT")
            .context("METRONOME_ADMIN_FIRE_RATE_LIMIT must be set")?
            .parse()
            .context("invalid METRONOME_ADMIN_FIRE_RATE_LIMIT")?;

        let surface_dispatch_failures = env_bool("METRONOME_SURFACE_DISPATCH_FAILURES");

        Ok(Self {
            database_url,
            admin_endpoint,
            admin_fire_req_rate_limit,
            surface_dispatch_failures,
        })
    }

    /// Executor knobs derived from this configuration; cadence comes from
    /// the defaults.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            admin_fire_req_rate_limit: self.admin_fire_req_rate_limit,
            failure_policy: if self.surface_dispatch_failures {
                FailurePolicy::Surface
            } else {
                FailurePolicy::Absorb
            },
            ..ExecutorConfig::default()
        }
    }
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false)
}
