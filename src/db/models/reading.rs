//! Glucose reading data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single CGM reading in the canonical dataset.
///
/// Timestamps are kept at minute resolution; the merge key derived from them
/// (see `dataset::merge::merge_key`) is what makes a reading unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub glucose_value: u16,
    pub source_upload_id: String,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, glucose_value: u16, source_upload_id: &str) -> Self {
        Self {
            timestamp,
            glucose_value,
            source_upload_id: source_upload_id.to_string(),
        }
    }
}

/// Inclusive time span covered by a set of readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.min && timestamp <= self.max
    }

    /// Range spanned by sorted readings; `None` when empty.
    pub fn of_sorted(readings: &[Reading]) -> Option<Self> {
        match (readings.first(), readings.last()) {
            (Some(first), Some(last)) => Some(Self {
                min: first.timestamp,
                max: last.timestamp,
            }),
            _ => None,
        }
    }
}

/// A raw alert line handed to the event clustering engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRow {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}
