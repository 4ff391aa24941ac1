//! Live trigger registry: one ticker task per registered schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use prometheus::IntCounter;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::schedule::Schedule;
use crate::trigger::{Trigger, TriggerError};

/// Callback invoked with the schedule and the instant a tick fired for.
pub type TickCallback =
    Arc<dyn Fn(Schedule, DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

struct JobHandle {
    alive: Arc<AtomicBool>,
    ticker: JoinHandle<()>,
}

impl JobHandle {
    fn stop(self) {
        self.alive.store(false, Ordering::SeqCst);
        self.ticker.abort();
    }
}

/// Maps schedule names to running ticker tasks.
///
/// Registering a name that is already live is a no-op, so reconcile passes
/// neither stack handles nor reset a fixed-rate ticker's anchor.
/// Deregistration is idempotent, and a stopped handle suppresses any tick
/// whose sleep already elapsed.
pub struct TriggerRegistry {
    jobs: Mutex<HashMap<String, JobHandle>>,
    job_func_panic: IntCounter,
}

impl TriggerRegistry {
    pub fn new(job_func_panic: IntCounter) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            job_func_panic,
        }
    }

    /// Start the ticker for `schedule`, unless one is already running under
    /// its name. Must run inside a tokio runtime.
    pub fn register(&self, schedule: &Schedule, callback: TickCallback) -> Result<(), TriggerError> {
        let trigger = Trigger::for_schedule(schedule)?;

        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&schedule.schedule_name()) {
            return Ok(());
        }

        let alive = Arc::new(AtomicBool::new(true));
        let ticker = tokio::spawn(run_ticker(
            trigger,
            schedule.clone(),
            callback,
            Arc::clone(&alive),
            self.job_func_panic.clone(),
        ));
        jobs.insert(schedule.schedule_name(), JobHandle { alive, ticker });
        Ok(())
    }

    /// Stop and remove the ticker for `schedule`, if one is registered.
    pub fn deregister(&self, schedule: &Schedule) {
        let mut jobs = self.jobs.lock();
        if let Some(handle) = jobs.remove(&schedule.schedule_name()) {
            handle.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Stop every ticker. No further ticks are scheduled; callbacks already
    /// spawned run to completion on their own.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (_, handle) in jobs.drain() {
            handle.stop();
        }
    }
}

async fn run_ticker(
    trigger: Trigger,
    schedule: Schedule,
    callback: TickCallback,
    alive: Arc<AtomicBool>,
    job_func_panic: IntCounter,
) {
    loop {
        let now = Utc::now();
        let Some(next) = trigger.next_fire(now) else {
            debug!(
                schedule = %schedule.schedule_name(),
                "no upcoming instants, ticker exiting"
            );
            break;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        if !alive.load(Ordering::SeqCst) {
            break;
        }

        // Each tick runs in its own short-lived task so a panicking callback
        // cannot take the ticker down with it. Awaiting the handle keeps
        // ticks of one schedule sequential.
        let tick = tokio::spawn((callback)(schedule.clone(), next));
        if let Err(join_err) = tick.await {
            if join_err.is_panic() {
                job_func_panic.inc();
                error!(
                    schedule = %schedule.schedule_name(),
                    instant = %next,
                    "tick callback panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn every_second(name: &str) -> Schedule {
        Schedule {
            project: "flytesnacks".to_string(),
            domain: "development".to_string(),
            name: name.to_string(),
            version: "v1".to_string(),
            kind: ScheduleKind::Cron {
                // Six fields: fires every second, keeping these tests short.
                expression: "* * * * * *".to_string(),
            },
            kickoff_time_input_arg: "kickoff_time".to_string(),
            active: true,
            updated_at: Utc::now(),
        }
    }

    fn counting_callback(calls: Arc<AtomicUsize>) -> TickCallback {
        Arc::new(move |_schedule, _instant| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    fn panic_counter() -> IntCounter {
        IntCounter::new("test_job_func_panic_total", "test counter").unwrap()
    }

    #[tokio::test]
    async fn register_twice_leaves_one_live_handle() {
        let registry = TriggerRegistry::new(panic_counter());
        let calls = Arc::new(AtomicUsize::new(0));

        let schedule = every_second("dup");
        registry
            .register(&schedule, counting_callback(Arc::clone(&calls)))
            .unwrap();
        registry
            .register(&schedule, counting_callback(Arc::clone(&calls)))
            .unwrap();
        assert_eq!(registry.len(), 1);

        registry.shutdown();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn invalid_expression_does_not_register() {
        let registry = TriggerRegistry::new(panic_counter());
        let mut schedule = every_second("bad");
        schedule.kind = ScheduleKind::Cron {
            expression: "not a cron".to_string(),
        };

        let calls = Arc::new(AtomicUsize::new(0));
        assert!(registry.register(&schedule, counting_callback(calls)).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn deregistered_schedule_stops_ticking() {
        let registry = TriggerRegistry::new(panic_counter());
        let calls = Arc::new(AtomicUsize::new(0));

        let schedule = every_second("stop");
        registry
            .register(&schedule, counting_callback(Arc::clone(&calls)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        registry.deregister(&schedule);
        // Idempotent: a second deregister is a no-op.
        registry.deregister(&schedule);

        // Let any tick that was already in flight drain, then watch for new
        // ones.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let settled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_future_ticks() {
        let panics = panic_counter();
        let registry = TriggerRegistry::new(panics.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let callback: TickCallback = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_schedule, _instant| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    panic!("tick callback exploded");
                })
            })
        };

        registry.register(&every_second("boom"), callback).unwrap();
        tokio::time::sleep(Duration::from_millis(2600)).await;
        registry.shutdown();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(panics.get() >= 2);
    }
}
