//! Deletion markers that survive cache rebuilds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DateRange, DeviceEventKind};

/// Hides readings inside `range` that came from uploads older than the
/// cleanup (`seq < applies_before_seq`). Later uploads are not affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingTombstone {
    pub id: i64,
    pub range: DateRange,
    pub applies_before_seq: i64,
    pub created_at: DateTime<Utc>,
}

impl ReadingTombstone {
    pub fn hides(&self, upload_seq: i64, timestamp: DateTime<Utc>) -> bool {
        upload_seq < self.applies_before_seq && self.range.contains(timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTombstone {
    pub kind: DeviceEventKind,
    pub timestamp: DateTime<Utc>,
    pub deleted_at: DateTime<Utc>,
}
