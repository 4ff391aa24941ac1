//! In-memory repositories for tests and local experimentation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RepositoryError, RepositoryResult, ScheduleRepository, SnapshotRepository};
use crate::schedule::Schedule;

/// Schedule set and snapshot log behind mutexes. Cloning shares state, so a
/// test can hand the same repository to the executor and keep mutating it.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    schedules: Arc<Mutex<Vec<Schedule>>>,
    snapshots: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_schedule_reads: Arc<AtomicBool>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_schedules(&self, schedules: Vec<Schedule>) {
        *self.schedules.lock() = schedules;
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Make subsequent `get_all` calls fail, to exercise the read-failure
    /// backoff path.
    pub fn fail_schedule_reads(&self, fail: bool) {
        self.fail_schedule_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScheduleRepository for MemoryRepository {
    async fn get_all(&self) -> RepositoryResult<Vec<Schedule>> {
        if self.fail_schedule_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Message(
                "schedule read failure injected".to_string(),
            ));
        }
        Ok(self.schedules.lock().clone())
    }
}

#[async_trait]
impl SnapshotRepository for MemoryRepository {
    async fn create_snapshot(&self, blob: Vec<u8>) -> RepositoryResult<()> {
        self.snapshots.lock().push(blob);
        Ok(())
    }

    async fn latest_snapshot(&self) -> RepositoryResult<Option<Vec<u8>>> {
        Ok(self.snapshots.lock().last().cloned())
    }
}
