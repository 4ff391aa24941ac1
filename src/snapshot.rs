//! Versioned serialization of the watermark table.
//!
//! A snapshot blob is one version byte followed by a bincode payload. The
//! format evolves append-only: newer versions may add fields, and decoders
//! that see a version they do not understand return an empty table instead of
//! misreading future state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::watermark::WatermarkTable;

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unable to encode snapshot payload: {0}")]
    Encode(#[source] bincode::Error),

    #[error("unable to decode snapshot payload: {0}")]
    Decode(#[source] bincode::Error),

    #[error("snapshot blob is empty")]
    Empty,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotV1 {
    last_execution_times: HashMap<String, DateTime<Utc>>,
}

/// Encode the watermark table into a versioned blob.
pub fn write_snapshot(table: &WatermarkTable) -> Result<Vec<u8>, SnapshotError> {
    let payload = SnapshotV1 {
        last_execution_times: table.export(),
    };
    let body = bincode::serialize(&payload).map_err(SnapshotError::Encode)?;

    let mut blob = Vec::with_capacity(1 + body.len());
    blob.push(SNAPSHOT_VERSION);
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Decode a snapshot blob back into a watermark table.
///
/// An unknown version is not an error: the caller gets an empty table and
/// catch-up bounds itself by each schedule's activation time instead.
pub fn read_snapshot(blob: &[u8]) -> Result<WatermarkTable, SnapshotError> {
    let Some((&version, body)) = blob.split_first() else {
        return Err(SnapshotError::Empty);
    };

    if version != SNAPSHOT_VERSION {
        warn!(
            version,
            "unknown snapshot version, starting from an empty watermark table"
        );
        return Ok(WatermarkTable::new());
    }

    let payload: SnapshotV1 = bincode::deserialize(body).map_err(SnapshotError::Decode)?;
    Ok(WatermarkTable::from_map(payload.last_execution_times))
}
