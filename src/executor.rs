//! The scheduler control loop: boot, catch-up, reconcile, checkpoint.
//!
//! `run` owns the whole lifecycle. It reads the latest watermark snapshot,
//! replays every instant missed while the process was down, then keeps the
//! live trigger registry in sync with the schedule set while a background
//! checkpointer persists watermarks. No failure past boot takes the loop
//! down; everything degrades to a counter and a log line.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::admin::AdminClient;
use crate::dispatch::{DispatchError, Dispatcher, FailurePolicy};
use crate::limiter::AdminRateLimiter;
use crate::metrics::SchedulerMetrics;
use crate::registry::{TickCallback, TriggerRegistry};
use crate::repository::{RepositoryError, ScheduleRepository, SnapshotRepository};
use crate::retry::RetryPolicy;
use crate::schedule::Schedule;
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::trigger::{Trigger, TriggerError};
use crate::watermark::WatermarkTable;

/// Cadence and dispatch knobs for the long-lived loops. Defaults match
/// production cadence; tests shrink them.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub reconcile_period: Duration,
    pub checkpoint_period: Duration,
    /// Extra sleep after a failed schedule read, on top of the reconcile
    /// period.
    pub read_failure_backoff: Duration,
    /// Execution-create requests per second against the admin service.
    pub admin_fire_req_rate_limit: u32,
    pub retry_policy: RetryPolicy,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            reconcile_period: Duration::from_secs(30),
            checkpoint_period: Duration::from_secs(30),
            read_failure_backoff: Duration::from_secs(60),
            admin_fire_req_rate_limit: 100,
            retry_policy: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("unable to read the schedule set: {0}")]
    ScheduleRead(#[from] RepositoryError),

    #[error("unable to enumerate instants during catch-up: {0}")]
    Trigger(#[from] TriggerError),

    #[error("catch-up aborted: {0}")]
    CatchUp(#[from] DispatchError),
}

pub struct WorkflowExecutor {
    schedules: Arc<dyn ScheduleRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    watermarks: Arc<WatermarkTable>,
    registry: TriggerRegistry,
    dispatcher: Dispatcher,
    limiter: Arc<AdminRateLimiter>,
    metrics: SchedulerMetrics,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        admin: Arc<dyn AdminClient>,
        metrics: SchedulerMetrics,
        config: ExecutorConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            admin,
            metrics.clone(),
            config.retry_policy,
            config.failure_policy,
        );
        Self {
            schedules,
            snapshots,
            watermarks: Arc::new(WatermarkTable::new()),
            registry: TriggerRegistry::new(metrics.job_func_panic.clone()),
            dispatcher,
            limiter: Arc::new(AdminRateLimiter::new(config.admin_fire_req_rate_limit)),
            metrics,
            config,
        }
    }

    pub fn watermarks(&self) -> &Arc<WatermarkTable> {
        &self.watermarks
    }

    /// Read the latest snapshot into the watermark table.
    ///
    /// Read and decode failures are logged and leave the table empty;
    /// catch-up then bounds itself by each schedule's activation time.
    pub async fn load_watermarks(&self) {
        let blob = match self.snapshots.latest_snapshot().await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("no snapshot yet, starting with an empty watermark table");
                return;
            }
            Err(err) => {
                error!(
                    error = %err,
                    "unable to read the latest snapshot, starting with an empty watermark table"
                );
                return;
            }
        };

        match read_snapshot(&blob) {
            Ok(table) => self.watermarks.replace(table.export()),
            Err(err) => error!(
                error = %err,
                "unable to decode the snapshot, starting with an empty watermark table"
            ),
        }
    }

    /// Replay every instant each active schedule missed, up to `to_time`.
    ///
    /// Instants of one schedule are fired serially in ascending order, and
    /// the watermark advances after each successful fire, so an interrupted
    /// catch-up resumes where it stopped.
    pub async fn catch_up_all(
        &self,
        schedules: &[Schedule],
        to_time: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        debug!(count = schedules.len(), %to_time, "catching up schedules");
        for schedule in schedules {
            let name = schedule.schedule_name();
            if !schedule.active {
                debug!(schedule = %name, "schedule inactive, skipping catch-up");
                continue;
            }

            // Catch up from the last active transition; a watermark newer
            // than that takes precedence.
            let mut from_time = schedule.updated_at;
            if let Some(mark) = self.watermarks.get(&name) {
                if mark > from_time {
                    from_time = mark;
                }
            }

            self.catch_up_schedule(schedule, from_time, to_time).await?;
            debug!(schedule = %name, %from_time, %to_time, "caught up schedule");
        }
        Ok(())
    }

    async fn catch_up_schedule(
        &self,
        schedule: &Schedule,
        from_time: DateTime<Utc>,
        to_time: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        let trigger = Trigger::for_schedule(schedule)?;
        let name = schedule.schedule_name();

        for instant in trigger.instants_between(from_time, to_time) {
            self.limiter.acquire().await;
            match self.dispatcher.fire(schedule, instant).await {
                Ok(()) => self.watermarks.update(&name, instant),
                Err(err) => {
                    self.metrics.catchup_error.inc();
                    error!(
                        schedule = %name,
                        %instant,
                        error = %err,
                        "unable to fire schedule during catch-up"
                    );
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Encode the watermark table and append one snapshot row. Empty tables
    /// skip the round-trip entirely.
    pub async fn checkpoint(&self) {
        persist_snapshot(self.snapshots.as_ref(), &self.watermarks, &self.metrics).await;
    }

    /// Run until `shutdown` flips to true.
    ///
    /// Boot order: snapshot read, schedule read, catch-up, checkpointer,
    /// reconcile loop. A failure reading the initial schedule set or during
    /// catch-up is fatal; after that the loop only logs and counts.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ExecutorError> {
        self.load_watermarks().await;

        let mut schedules = self.schedules.get_all().await?;
        let catch_up_till = Utc::now();
        self.catch_up_all(&schedules, catch_up_till).await?;
        info!(schedules = schedules.len(), %catch_up_till, "catch-up complete");

        let checkpointer = self.spawn_checkpointer(shutdown.clone());

        loop {
            // Reconciles the registry from the schedule set read on the
            // previous pass; a change lands one reconcile period late.
            for schedule in &schedules {
                if !schedule.active {
                    self.registry.deregister(schedule);
                } else if let Err(err) = self.registry.register(schedule, self.tick_callback()) {
                    self.metrics.schedule_registration_failure.inc();
                    error!(
                        schedule = %schedule.schedule_name(),
                        error = %err,
                        "unable to register schedule"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconcile_period) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            match self.schedules.get_all().await {
                Ok(latest) => schedules = latest,
                Err(err) => {
                    self.metrics.schedule_read_error.inc();
                    error!(
                        error = %err,
                        backoff = ?self.config.read_failure_backoff,
                        "unable to read schedules, sleeping additional backoff"
                    );
                    tokio::time::sleep(self.config.read_failure_backoff).await;
                }
            }
        }

        self.registry.shutdown();
        let _ = checkpointer.await;
        info!("exiting workflow executor");
        Ok(())
    }

    /// Callback run on every live tick: re-check activity, take a rate-limit
    /// token, fire, and advance the watermark on success.
    fn tick_callback(&self) -> TickCallback {
        let dispatcher = self.dispatcher.clone();
        let limiter = Arc::clone(&self.limiter);
        let watermarks = Arc::clone(&self.watermarks);

        Arc::new(move |schedule: Schedule, instant: DateTime<Utc>| {
            let dispatcher = dispatcher.clone();
            let limiter = Arc::clone(&limiter);
            let watermarks = Arc::clone(&watermarks);

            Box::pin(async move {
                // Deactivated while the tick was in flight.
                if !schedule.active {
                    return;
                }
                limiter.acquire().await;
                match dispatcher.fire(&schedule, instant).await {
                    Ok(()) => watermarks.update(&schedule.schedule_name(), instant),
                    Err(err) => error!(
                        schedule = %schedule.schedule_name(),
                        %instant,
                        error = %err,
                        "unable to fire schedule"
                    ),
                }
            })
        })
    }

    fn spawn_checkpointer(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let snapshots = Arc::clone(&self.snapshots);
        let watermarks = Arc::clone(&self.watermarks);
        let metrics = self.metrics.clone();
        let period = self.config.checkpoint_period;

        tokio::spawn(async move {
            let worker = tokio::spawn(checkpoint_loop(
                snapshots,
                watermarks,
                metrics.clone(),
                period,
                shutdown,
            ));
            if let Err(join_err) = worker.await {
                if join_err.is_panic() {
                    metrics.checkpoint_panic.inc();
                    error!("checkpointer panicked");
                }
            }
        })
    }
}

async fn checkpoint_loop(
    snapshots: Arc<dyn SnapshotRepository>,
    watermarks: Arc<WatermarkTable>,
    metrics: SchedulerMetrics,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        persist_snapshot(snapshots.as_ref(), &watermarks, &metrics).await;
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }
}

async fn persist_snapshot(
    snapshots: &dyn SnapshotRepository,
    watermarks: &WatermarkTable,
    metrics: &SchedulerMetrics,
) {
    if watermarks.is_empty() {
        return;
    }

    let blob = match write_snapshot(watermarks) {
        Ok(blob) => blob,
        Err(err) => {
            metrics.checkpoint_creation_error.inc();
            error!(error = %err, "unable to encode the watermark snapshot");
            return;
        }
    };

    if let Err(err) = snapshots.create_snapshot(blob).await {
        metrics.checkpoint_save_error.inc();
        error!(error = %err, "unable to save the watermark snapshot");
    }
}

/// Resolves once shutdown is requested. A closed channel counts as a
/// request, so a dropped sender stops the loops instead of spinning them.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
