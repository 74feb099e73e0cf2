//! Flat key/value JSON file left behind by older versions of the app.
//! Values are either JSON documents or JSON encoded as strings.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const LEGACY_UPLOADS_KEY: &str = "agp_uploads";
pub const LEGACY_ACTIVE_KEY: &str = "agp_active_upload";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDateRange {
    pub min: String,
    pub max: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUpload {
    pub id: String,
    /// ISO-8601 save time.
    pub timestamp: String,
    #[serde(default)]
    pub name: Option<String>,
    pub csv_data: String,
    #[serde(default = "locked_by_default")]
    pub locked: bool,
    #[serde(default)]
    pub date_range: Option<LegacyDateRange>,
    /// Workdays as `YYYY/MM/DD` strings.
    #[serde(default)]
    pub pro_time_data: Option<Vec<String>>,
}

fn locked_by_default() -> bool {
    true
}

/// An entry of the legacy uploads array that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LegacyUploads {
    pub uploads: Vec<LegacyUpload>,
    pub unreadable: Vec<UnreadableEntry>,
}

#[derive(Debug, Clone)]
pub struct LegacyStore {
    path: PathBuf,
}

impl LegacyStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn uploads(&self) -> Result<LegacyUploads> {
        let map = self.read_map()?;
        let Some(value) = map.get(LEGACY_UPLOADS_KEY) else {
            return Ok(LegacyUploads::default());
        };

        let entries = match decode_value(value)? {
            Value::Array(entries) => entries,
            Value::Null => Vec::new(),
            other => anyhow::bail!("{LEGACY_UPLOADS_KEY} is not an array: {other}"),
        };

        let mut result = LegacyUploads::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<LegacyUpload>(entry) {
                Ok(upload) => result.uploads.push(upload),
                Err(err) => result.unreadable.push(UnreadableEntry {
                    index,
                    reason: err.to_string(),
                }),
            }
        }
        Ok(result)
    }

    pub fn active_id(&self) -> Result<Option<String>> {
        let map = self.read_map()?;
        Ok(match map.get(LEGACY_ACTIVE_KEY) {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        })
    }

    /// Rewrite the file without `keys`, keeping everything else.
    pub fn remove_keys(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.read_map()?;
        for key in keys {
            map.remove(*key);
        }

        let tmp = self.path.with_extension("json.tmp");
        let serialized = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&tmp, serialized)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read legacy storage {}", self.path.display()))?;
        match serde_json::from_str::<Value>(&contents).context("legacy storage is not valid JSON")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("legacy storage is not a JSON object"),
        }
    }
}

/// Values written by the browser store are JSON strings holding JSON.
fn decode_value(value: &Value) -> Result<Value> {
    match value {
        Value::String(raw) => serde_json::from_str(raw).context("corrupt legacy value"),
        other => Ok(other.clone()),
    }
}
