//! In-memory table of per-schedule last-fired instants.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Shared map from schedule name to the most recent successfully dispatched
/// instant. An absent entry means the schedule has never fired.
///
/// Updates are last-writer-wins with no monotonicity guard: the dispatcher
/// and the catch-up driver only ever update a given key with nondecreasing
/// instants, so the forward-only invariant holds by construction.
#[derive(Debug, Default)]
pub struct WatermarkTable {
    inner: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl WatermarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, DateTime<Utc>>) -> Self {
        Self {
            inner: Mutex::new(map),
        }
    }

    pub fn get(&self, name: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().get(name).copied()
    }

    pub fn update(&self, name: &str, instant: DateTime<Utc>) {
        self.inner.lock().insert(name.to_string(), instant);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of the full table, taken under the lock. Used by the snapshot
    /// codec so encoding happens outside the critical section.
    pub fn export(&self) -> HashMap<String, DateTime<Utc>> {
        self.inner.lock().clone()
    }

    /// Swap the whole table in one step. Only called at boot, before any
    /// dispatcher or catch-up task holds a reference.
    pub fn replace(&self, map: HashMap<String, DateTime<Utc>>) {
        *self.inner.lock() = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn absent_entries_read_as_none() {
        let table = WatermarkTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get("ns/dev/report/v1"), None);
    }

    #[test]
    fn update_overwrites_and_export_round_trips() {
        let table = WatermarkTable::new();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();

        table.update("ns/dev/report/v1", earlier);
        table.update("ns/dev/report/v1", later);
        assert_eq!(table.get("ns/dev/report/v1"), Some(later));

        let rebuilt = WatermarkTable::from_map(table.export());
        assert_eq!(rebuilt.get("ns/dev/report/v1"), Some(later));
        assert!(!rebuilt.is_empty());
    }
}
