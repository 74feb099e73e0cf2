//! Upload record data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertRow, DateRange, Reading};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ImportStrategy {
    /// Merge into the existing dataset; incoming wins per merge key.
    #[default]
    Append,
    /// Supersede every earlier upload; the dataset restarts from this one.
    Replace,
}

impl ImportStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStrategy::Append => "append",
            ImportStrategy::Replace => "replace",
        }
    }
}

/// One ingested export file. `payload` lives in its own column and is only
/// loaded on demand (see `LoadedUpload`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: String,
    /// Monotonic replay order, never reused after deletion.
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub filename: Option<String>,
    pub locked: bool,
    pub strategy: ImportStrategy,
    pub superseded: bool,
    pub date_range: Option<DateRange>,
    pub reading_count: usize,
}

/// Parsed content of an upload, kept so the cache can be replayed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub readings: Vec<Reading>,
    pub alerts: Vec<AlertRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedUpload {
    pub record: UploadRecord,
    pub payload: UploadPayload,
}
