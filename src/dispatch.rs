//! Building and submitting one execution request per (schedule, instant).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tonic::Code;
use tracing::{debug, error};

use crate::admin::{
    to_proto_timestamp, AdminClient, ExecutionCreateRequest, ExecutionMetadata, ExecutionMode,
    ExecutionSpec, LaunchPlanIdentifier, Literal,
};
use crate::metrics::SchedulerMetrics;
use crate::retry::{retry_on_error, RetryPolicy};
use crate::schedule::Schedule;

/// Width of the hash portion of an execution name. With the leading letter
/// the identifier stays within the admin's 20-character limit.
const EXECUTION_NAME_HASH_WIDTH: usize = 19;

/// What [`Dispatcher::fire`] does once the retry budget is spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Swallow the terminal error and report success, so the caller advances
    /// the watermark past the failed instant. Matches the historical
    /// behavior this scheduler replaces.
    #[default]
    Absorb,
    /// Return the terminal error so callers hold the watermark and catch-up
    /// aborts.
    Surface,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("admin rejected execution after the retry budget: {0}")]
    Exhausted(#[source] tonic::Status),
}

/// Everything except the idempotent duplicate is worth retrying.
pub fn is_retryable(code: Code) -> bool {
    code != Code::AlreadyExists
}

/// Deterministic execution name for a (schedule identity, instant) pair.
///
/// Pure: repeated calls with equal inputs yield byte-equal names, which is
/// what makes duplicate submissions collide on the admin side. The name is a
/// hash of the identity and the instant, hex-encoded, truncated, and prefixed
/// with a letter so it stays a valid identifier.
pub fn execution_name(schedule: &Schedule, instant: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    for part in [
        &schedule.project,
        &schedule.domain,
        &schedule.name,
        &schedule.version,
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"/");
    }
    hasher.update(instant.timestamp().to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("f{}", &digest[..EXECUTION_NAME_HASH_WIDTH])
}

/// Build the request fired at the admin service for one instant. The instant
/// doubles as the `kickoff_time_input_arg` input, injected as a datetime
/// literal.
pub fn build_execution_request(
    schedule: &Schedule,
    instant: DateTime<Utc>,
) -> ExecutionCreateRequest {
    let mut inputs = HashMap::new();
    inputs.insert(
        schedule.kickoff_time_input_arg.clone(),
        Literal {
            datetime: Some(to_proto_timestamp(instant)),
        },
    );

    ExecutionCreateRequest {
        project: schedule.project.clone(),
        domain: schedule.domain.clone(),
        name: execution_name(schedule, instant),
        spec: Some(ExecutionSpec {
            launch_plan: Some(LaunchPlanIdentifier {
                project: schedule.project.clone(),
                domain: schedule.domain.clone(),
                name: schedule.name.clone(),
                version: schedule.version.clone(),
            }),
            metadata: Some(ExecutionMetadata {
                mode: ExecutionMode::Scheduled as i32,
                scheduled_at: Some(to_proto_timestamp(instant)),
            }),
        }),
        inputs,
    }
}

/// Submits execution requests with bounded retry and duplicate absorption.
#[derive(Clone)]
pub struct Dispatcher {
    admin: Arc<dyn AdminClient>,
    metrics: SchedulerMetrics,
    retry_policy: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(
        admin: Arc<dyn AdminClient>,
        metrics: SchedulerMetrics,
        retry_policy: RetryPolicy,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            admin,
            metrics,
            retry_policy,
            failure_policy,
        }
    }

    /// Fire `schedule` at `instant`.
    ///
    /// A schedule deactivated between registration and this tick is skipped
    /// without submission. `AlreadyExists` from the admin means an earlier
    /// attempt or an earlier process already submitted this instant, and
    /// counts as success on whichever attempt it surfaces.
    pub async fn fire(
        &self,
        schedule: &Schedule,
        instant: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        if !schedule.active {
            debug!(
                schedule = %schedule.schedule_name(),
                "schedule no longer active, skipping fire"
            );
            return Ok(());
        }

        let request = build_execution_request(schedule, instant);
        let result = retry_on_error(
            self.retry_policy,
            |status: &tonic::Status| {
                if !is_retryable(status.code()) {
                    debug!(
                        schedule = %schedule.schedule_name(),
                        %instant,
                        "execution already exists, treating as fired"
                    );
                    return false;
                }
                self.metrics.failed_execution.inc();
                error!(
                    schedule = %schedule.schedule_name(),
                    %instant,
                    error = %status,
                    "unable to create execution"
                );
                true
            },
            || {
                let admin = Arc::clone(&self.admin);
                let request = request.clone();
                async move { admin.create_execution(request).await }
            },
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::AlreadyExists => Ok(()),
            Err(status) => match self.failure_policy {
                FailurePolicy::Absorb => Ok(()),
                FailurePolicy::Surface => Err(DispatchError::Exhausted(status)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::ExecutionCreateResponse;
    use crate::schedule::ScheduleKind;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tonic::Status;

    fn schedule() -> Schedule {
        Schedule {
            project: "flytesnacks".to_string(),
            domain: "development".to_string(),
            name: "hourly_report".to_string(),
            version: "v1".to_string(),
            kind: ScheduleKind::Cron {
                expression: "0 * * * *".to_string(),
            },
            kickoff_time_input_arg: "kickoff_time".to_string(),
            active: true,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 30,
            delay: Duration::ZERO,
        }
    }

    enum Reply {
        Ok,
        AlreadyExists,
        Internal,
    }

    struct StubAdmin {
        reply: Reply,
        calls: Mutex<Vec<ExecutionCreateRequest>>,
    }

    impl StubAdmin {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl AdminClient for StubAdmin {
        async fn create_execution(
            &self,
            request: ExecutionCreateRequest,
        ) -> Result<ExecutionCreateResponse, Status> {
            self.calls.lock().push(request);
            match self.reply {
                Reply::Ok => Ok(ExecutionCreateResponse::default()),
                Reply::AlreadyExists => Err(Status::already_exists("duplicate execution")),
                Reply::Internal => Err(Status::internal("injected failure")),
            }
        }
    }

    fn dispatcher(admin: Arc<StubAdmin>, failure_policy: FailurePolicy) -> (Dispatcher, SchedulerMetrics) {
        let metrics = SchedulerMetrics::new().unwrap();
        (
            Dispatcher::new(admin, metrics.clone(), fast_retry(), failure_policy),
            metrics,
        )
    }

    #[test]
    fn execution_name_is_deterministic() {
        let a = execution_name(&schedule(), instant());
        let b = execution_name(&schedule(), instant());
        assert_eq!(a, b);
    }

    #[test]
    fn execution_name_is_a_short_identifier() {
        let name = execution_name(&schedule(), instant());
        assert_eq!(name.len(), 20);
        assert!(name.starts_with('f'));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn execution_name_varies_with_instant_and_identity() {
        let base = execution_name(&schedule(), instant());

        let later = instant() + chrono::Duration::hours(1);
        assert_ne!(base, execution_name(&schedule(), later));

        let mut other = schedule();
        other.version = "v2".to_string();
        assert_ne!(base, execution_name(&other, instant()));
    }

    #[test]
    fn request_injects_the_kickoff_datetime() {
        let request = build_execution_request(&schedule(), instant());
        let literal = request.inputs.get("kickoff_time").unwrap();
        assert_eq!(
            literal.datetime.as_ref().unwrap().seconds,
            instant().timestamp()
        );

        let metadata = request.spec.as_ref().unwrap().metadata.as_ref().unwrap();
        assert_eq!(metadata.mode, ExecutionMode::Scheduled as i32);
        assert_eq!(
            metadata.scheduled_at.as_ref().unwrap().seconds,
            instant().timestamp()
        );
    }

    #[test]
    fn already_exists_is_not_retryable() {
        assert!(!is_retryable(Code::AlreadyExists));
        assert!(is_retryable(Code::Internal));
        assert!(is_retryable(Code::Unavailable));
    }

    #[tokio::test]
    async fn inactive_schedule_is_skipped_without_submission() {
        let admin = StubAdmin::new(Reply::Ok);
        let (dispatcher, _) = dispatcher(admin.clone(), FailurePolicy::Absorb);

        let mut inactive = schedule();
        inactive.active = false;
        dispatcher.fire(&inactive, instant()).await.unwrap();
        assert_eq!(admin.call_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_counts_as_success_on_the_first_attempt() {
        let admin = StubAdmin::new(Reply::AlreadyExists);
        let (dispatcher, metrics) = dispatcher(admin.clone(), FailurePolicy::Absorb);

        dispatcher.fire(&schedule(), instant()).await.unwrap();
        assert_eq!(admin.call_count(), 1);
        assert_eq!(metrics.failed_execution.get(), 0);
    }

    #[tokio::test]
    async fn transient_failures_spend_the_full_budget_and_are_absorbed() {
        let admin = StubAdmin::new(Reply::Internal);
        let (dispatcher, metrics) = dispatcher(admin.clone(), FailurePolicy::Absorb);

        dispatcher.fire(&schedule(), instant()).await.unwrap();
        assert_eq!(admin.call_count(), 30);
        assert_eq!(metrics.failed_execution.get(), 30);
    }

    #[tokio::test]
    async fn surface_policy_exposes_the_terminal_error() {
        let admin = StubAdmin::new(Reply::Internal);
        let (dispatcher, metrics) = dispatcher(admin.clone(), FailurePolicy::Surface);

        let err = dispatcher.fire(&schedule(), instant()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Exhausted(_)));
        assert_eq!(metrics.failed_execution.get(), 30);
    }
}
