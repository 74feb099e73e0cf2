//! Producers that turn raw export text into structured rows.
//!
//! The store only depends on the `RowProducer` and `WorkdayParser` traits;
//! CareLink and ProTime are the implementations shipped by default.

pub mod carelink;
pub mod workdays;

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{AlertRow, Reading};

pub use carelink::CareLinkParser;
pub use workdays::ProTimeParser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("CSV file is empty")]
    Empty,

    #[error("invalid CSV format: {0}")]
    Format(String),

    #[error("no valid glucose data found, checked {checked} rows")]
    NoReadings { checked: usize },

    #[error("could not parse work schedule: {0}")]
    Workdays(String),
}

/// Patient and device details from the export header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvMetadata {
    pub name: Option<String>,
    pub device: Option<String>,
    pub device_serial: Option<String>,
    pub cgm: Option<String>,
}

impl CsvMetadata {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.device.is_none()
            && self.device_serial.is_none()
            && self.cgm.is_none()
    }
}

/// One kept data row: it carries a glucose value, an alert or a rewind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub timestamp: DateTime<Utc>,
    pub glucose: Option<u16>,
    pub alert: Option<String>,
    pub rewind: bool,
}

/// A row that could not be used. Counted and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportException {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedExport {
    pub rows: Vec<CsvRow>,
    pub metadata: CsvMetadata,
    pub exceptions: Vec<ImportException>,
}

/// Alert text recorded for pump rewind rows.
pub const REWIND_ALERT: &str = "Rewind";

impl ParsedExport {
    /// Glucose readings tagged with the upload they came from, in row order.
    pub fn readings(&self, upload_id: &str) -> Vec<Reading> {
        self.rows
            .iter()
            .filter_map(|row| {
                row.glucose
                    .map(|value| Reading::new(row.timestamp, value, upload_id))
            })
            .collect()
    }

    /// Alert rows for the clustering engine. Rewinds become an alert of their
    /// own so the policy table can match them.
    pub fn alert_rows(&self) -> Vec<AlertRow> {
        let mut alerts = Vec::new();
        for row in &self.rows {
            if let Some(text) = &row.alert {
                alerts.push(AlertRow {
                    timestamp: row.timestamp,
                    text: text.clone(),
                });
            }
            if row.rewind {
                alerts.push(AlertRow {
                    timestamp: row.timestamp,
                    text: REWIND_ALERT.to_string(),
                });
            }
        }
        alerts
    }
}

/// Turns raw export text into rows plus header metadata.
pub trait RowProducer: Send + Sync {
    fn parse(&self, raw: &str) -> Result<ParsedExport, ParseError>;
}

/// Extracts the set of work days from a schedule export.
pub trait WorkdayParser: Send + Sync {
    /// `fallback_year` is used when the text never states a year.
    fn parse_workdays(
        &self,
        raw: &str,
        fallback_year: i32,
    ) -> Result<BTreeSet<NaiveDate>, ParseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(minute: u32, glucose: Option<u16>, alert: Option<&str>, rewind: bool) -> CsvRow {
        CsvRow {
            timestamp: Utc.with_ymd_and_hms(2025, 10, 1, 8, minute, 0).unwrap(),
            glucose,
            alert: alert.map(str::to_string),
            rewind,
        }
    }

    #[test]
    fn readings_skip_rows_without_glucose() {
        let export = ParsedExport {
            rows: vec![
                row(0, Some(110), None, false),
                row(5, None, Some("SENSOR CONNECTED"), false),
                row(10, Some(115), None, false),
            ],
            ..Default::default()
        };

        let readings = export.readings("u1");
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.source_upload_id == "u1"));
    }

    #[test]
    fn rewinds_become_alert_rows() {
        let export = ParsedExport {
            rows: vec![row(0, None, None, true), row(5, Some(100), Some("CHANGE SENSOR"), false)],
            ..Default::default()
        };

        let alerts = export.alert_rows();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].text, REWIND_ALERT);
        assert_eq!(alerts[1].text, "CHANGE SENSOR");
    }
}
