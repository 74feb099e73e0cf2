//! JSON snapshot of every persisted category, written before destructive
//! cleanup.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{
    models::{
        DeviceEvent, EventTombstone, ImportHistoryEntry, LoadedUpload, Reading, ReadingTombstone,
    },
    repositories::{device_events, import_history, master_cache, settings, tombstones, uploads, workdays},
};
use crate::settings::PatientInfo;

pub const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub reason: String,
    pub uploads: Vec<LoadedUpload>,
    pub active_upload_id: Option<String>,
    /// Cache contents at export time, if one was stored.
    pub master_readings: Option<Vec<Reading>>,
    pub device_events: Vec<DeviceEvent>,
    pub event_tombstones: Vec<EventTombstone>,
    pub reading_tombstones: Vec<ReadingTombstone>,
    pub workdays: BTreeSet<NaiveDate>,
    pub import_history: Vec<ImportHistoryEntry>,
    pub patient: Option<PatientInfo>,
}

impl BackupExport {
    /// Read everything from the database. Must run on the DB worker.
    pub fn collect(conn: &Connection, reason: &str) -> Result<Self> {
        let mut loaded = Vec::new();
        for record in uploads::list_uploads(conn)? {
            let payload = uploads::load_payload(conn, &record.id)?
                .ok_or_else(|| anyhow!("payload missing for upload {}", record.id))?;
            loaded.push(LoadedUpload { record, payload });
        }

        let master_readings = match master_cache::cache_blob(conn)? {
            Some(blob) => Some(serde_json::from_str(&blob).context("corrupt master cache blob")?),
            None => None,
        };

        Ok(Self {
            format_version: BACKUP_FORMAT_VERSION,
            exported_at: Utc::now(),
            reason: reason.to_string(),
            uploads: loaded,
            active_upload_id: settings::active_upload_id(conn)?,
            master_readings,
            device_events: device_events::load_all(conn)?,
            event_tombstones: tombstones::load_event_tombstones(conn)?,
            reading_tombstones: tombstones::load_reading_tombstones(conn)?,
            workdays: workdays::list_workdays(conn)?,
            import_history: import_history::list_entries(conn)?,
            patient: None,
        })
    }
}

/// Destination for backup exports. Called from a blocking thread.
pub trait BackupSink: Send + Sync {
    /// Persist the export; returns where it was written.
    fn write(&self, export: &BackupExport) -> Result<PathBuf>;
}

/// Writes pretty-printed JSON files into a directory.
#[derive(Debug, Clone)]
pub struct FileBackupSink {
    dir: PathBuf,
}

impl FileBackupSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BackupSink for FileBackupSink {
    fn write(&self, export: &BackupExport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create backup dir {}", self.dir.display()))?;

        let filename = format!(
            "agp-backup-{}.json",
            export.exported_at.format("%Y%m%dT%H%M%S%.3fZ")
        );
        let path = self.dir.join(filename);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(export).context("failed to serialize backup")?;
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move backup into {}", path.display()))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn empty_export() -> BackupExport {
        BackupExport {
            format_version: BACKUP_FORMAT_VERSION,
            exported_at: Utc::now(),
            reason: "test".into(),
            uploads: Vec::new(),
            active_upload_id: None,
            master_readings: None,
            device_events: Vec::new(),
            event_tombstones: Vec::new(),
            reading_tombstones: Vec::new(),
            workdays: BTreeSet::new(),
            import_history: Vec::new(),
            patient: None,
        }
    }

    #[test]
    fn file_sink_writes_readable_json() {
        let dir = tempdir().unwrap();
        let sink = FileBackupSink::new(dir.path().join("backups"));

        let path = sink.write(&empty_export()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let parsed: BackupExport = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.reason, "test");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
