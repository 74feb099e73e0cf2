use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::parsing::CsvMetadata;

/// Patient details shown on reports. Device fields are refreshed from each
/// upload's header unless the user locked the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientInfo {
    pub name: String,
    pub dob: String,
    pub physician: String,
    pub email: String,
    pub cgm: String,
    pub device: String,
    pub device_serial: String,
    pub is_locked: bool,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<PatientInfo>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read patient info from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            PatientInfo::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn patient(&self) -> PatientInfo {
        self.read().clone()
    }

    pub fn update_patient(&self, info: PatientInfo) -> Result<()> {
        let mut guard = self.write();
        *guard = info;
        self.persist(&guard)
    }

    /// Copy device details from an export header. Header values win over
    /// stored ones; user-entered fields are untouched. Returns `false` when
    /// the record is locked or nothing changed.
    pub fn sync_device_metadata(&self, metadata: &CsvMetadata) -> Result<bool> {
        if metadata.is_empty() {
            return Ok(false);
        }

        let mut guard = self.write();
        if guard.is_locked {
            return Ok(false);
        }

        let mut updated = guard.clone();
        if let Some(name) = &metadata.name {
            updated.name = name.clone();
        }
        if let Some(cgm) = &metadata.cgm {
            updated.cgm = cgm.clone();
        }
        if let Some(device) = &metadata.device {
            updated.device = device.clone();
        }
        if let Some(serial) = &metadata.device_serial {
            updated.device_serial = serial.clone();
        }

        if updated == *guard {
            return Ok(false);
        }

        self.persist(&updated)?;
        *guard = updated;
        Ok(true)
    }

    fn read(&self) -> RwLockReadGuard<'_, PatientInfo> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, PatientInfo> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &PatientInfo) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write patient info to {}", self.path.display()))
    }
}
