use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ImportStrategy;

/// Audit entry for one import, kept in a capped ring buffer (newest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryEntry {
    pub id: String,
    pub filename: String,
    pub record_count: usize,
    pub duration_ms: u64,
    pub strategy: ImportStrategy,
    pub exception_count: usize,
    pub timestamp: DateTime<Utc>,
}
