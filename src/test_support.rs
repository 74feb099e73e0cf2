//! Fixtures shared by the unit tests: CareLink exports and temporary stores.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::{
    dataset::{BackupSink, FileBackupSink, MasterDatasetStore},
    db::Database,
};

const COLUMNS: usize = 40;

pub fn ts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid test timestamp")
}

/// One data row of a CareLink export.
#[derive(Debug, Clone)]
pub struct CsvLine {
    pub timestamp: DateTime<Utc>,
    pub glucose: Option<u16>,
    /// Written verbatim instead of `glucose` when set.
    pub glucose_raw: Option<String>,
    /// Written verbatim instead of the formatted date when set.
    pub date_raw: Option<String>,
    pub alert: Option<String>,
    pub rewind: bool,
}

impl CsvLine {
    fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            glucose: None,
            glucose_raw: None,
            date_raw: None,
            alert: None,
            rewind: false,
        }
    }

    pub fn glucose(timestamp: DateTime<Utc>, value: u16) -> Self {
        Self {
            glucose: Some(value),
            ..Self::empty(timestamp)
        }
    }

    pub fn alert(timestamp: DateTime<Utc>, text: &str) -> Self {
        Self {
            alert: Some(text.to_string()),
            ..Self::empty(timestamp)
        }
    }

    pub fn rewind(timestamp: DateTime<Utc>) -> Self {
        Self {
            rewind: true,
            ..Self::empty(timestamp)
        }
    }
}

/// A CareLink export with the usual six metadata lines, a column header row
/// and one `;`-separated row per line.
pub fn carelink_csv(lines: &[CsvLine]) -> String {
    let mut out = String::new();
    out.push_str("Last Name;First Name;Patient ID;Start Date;End Date;Device;MiniMed 780G MMT-1886\n");
    out.push_str("\"Doe\";\"Jane\";;2025/10/01;2025/10/14;\"Serial Number\";NG4114235H\n");
    out.push_str("Patient DOB;;;;;;CGM;Guardian 4 Sensor\n");
    out.push_str("Bolus Wizard Settings;;;\n");
    out.push_str(";;;\n");
    out.push_str("-------;;;\n");

    let mut header = vec![String::new(); COLUMNS];
    header[0] = "Index".into();
    header[1] = "Date".into();
    header[2] = "Time".into();
    header[7] = "Alert".into();
    header[21] = "Prime Type".into();
    header[34] = "Sensor Glucose (mg/dL)".into();
    out.push_str(&header.join(";"));
    out.push('\n');

    for (index, line) in lines.iter().enumerate() {
        let mut row = vec![String::new(); COLUMNS];
        row[0] = index.to_string();
        row[1] = line
            .date_raw
            .clone()
            .unwrap_or_else(|| line.timestamp.format("%Y/%m/%d").to_string());
        row[2] = line.timestamp.format("%H:%M:%S").to_string();
        if let Some(alert) = &line.alert {
            row[7] = alert.clone();
        }
        if line.rewind {
            row[21] = "Rewind".into();
        }
        if let Some(raw) = &line.glucose_raw {
            row[34] = raw.clone();
        } else if let Some(value) = line.glucose {
            row[34] = value.to_string();
        }
        out.push_str(&row.join(";"));
        out.push('\n');
    }
    out
}

/// `count` glucose rows five minutes apart.
pub fn glucose_series(start: DateTime<Utc>, count: usize, value: u16) -> Vec<CsvLine> {
    (0..count)
        .map(|step| CsvLine::glucose(start + Duration::minutes(5 * step as i64), value))
        .collect()
}

pub async fn temp_store() -> (TempDir, MasterDatasetStore) {
    let dir = TempDir::new().expect("temp dir");
    let sink = Arc::new(FileBackupSink::new(dir.path().join("backups")));
    let store = open_store(&dir, sink);
    (dir, store)
}

pub async fn temp_store_with_sink(sink: Arc<dyn BackupSink>) -> (TempDir, MasterDatasetStore) {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, sink);
    (dir, store)
}

fn open_store(dir: &TempDir, sink: Arc<dyn BackupSink>) -> MasterDatasetStore {
    let db = Database::new(dir.path().join("agp.sqlite3")).expect("open database");
    MasterDatasetStore::new(db, sink)
}
