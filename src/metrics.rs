//! Prometheus counters for the scheduler control plane.

use prometheus::{IntCounter, Registry};

/// Counter set shared across the dispatcher, trigger registry, catch-up
/// driver, and checkpointer. Cloning shares the underlying counters.
#[derive(Clone)]
pub struct SchedulerMetrics {
    pub failed_execution: IntCounter,
    pub checkpoint_panic: IntCounter,
    pub checkpoint_save_error: IntCounter,
    pub checkpoint_creation_error: IntCounter,
    pub catchup_error: IntCounter,
    pub schedule_registration_failure: IntCounter,
    pub schedule_read_error: IntCounter,
    pub job_func_panic: IntCounter,
}

impl SchedulerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            failed_execution: IntCounter::new(
                "metronome_failed_execution_total",
                "Unsuccessful attempts to create a scheduled execution on the admin service",
            )?,
            checkpoint_panic: IntCounter::new(
                "metronome_checkpoint_panic_total",
                "Crashes of the checkpointer task",
            )?,
            checkpoint_save_error: IntCounter::new(
                "metronome_checkpoint_save_error_total",
                "Unsuccessful attempts to save an encoded snapshot to the database",
            )?,
            checkpoint_creation_error: IntCounter::new(
                "metronome_checkpoint_creation_error_total",
                "Unsuccessful attempts to encode a snapshot from the watermark table",
            )?,
            catchup_error: IntCounter::new(
                "metronome_catchup_error_total",
                "Unsuccessful attempts to fire a schedule during catch-up",
            )?,
            schedule_registration_failure: IntCounter::new(
                "metronome_schedule_registration_failure_total",
                "Unsuccessful attempts to register a schedule with the trigger registry",
            )?,
            schedule_read_error: IntCounter::new(
                "metronome_schedule_read_error_total",
                "Unsuccessful attempts to read the schedule set from the database",
            )?,
            job_func_panic: IntCounter::new(
                "metronome_job_func_panic_total",
                "Crashes of tick callbacks run by the trigger registry",
            )?,
        })
    }

    /// Register every counter against `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.failed_execution.clone()))?;
        registry.register(Box::new(self.checkpoint_panic.clone()))?;
        registry.register(Box::new(self.checkpoint_save_error.clone()))?;
        registry.register(Box::new(self.checkpoint_creation_error.clone()))?;
        registry.register(Box::new(self.catchup_error.clone()))?;
        registry.register(Box::new(self.schedule_registration_failure.clone()))?;
        registry.register(Box::new(self.schedule_read_error.clone()))?;
        registry.register(Box::new(self.job_func_panic.clone()))?;
        Ok(())
    }
}
