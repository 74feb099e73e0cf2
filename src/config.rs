use std::path::PathBuf;

use crate::clustering::{AlertPolicy, ClusteringConfig};

const DATA_DIR_ENV: &str = "AGP_DATA_DIR";
const DEBUG_ENV: &str = "AGP_DEBUG";

/// Process-level settings: where files live and how chatty logging is.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl AppConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            debug: false,
        }
    }

    /// `AGP_DATA_DIR` overrides the data directory (default `$HOME/.agp-plus`),
    /// `AGP_DEBUG=1|true` enables debug logging.
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let debug = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self { data_dir, debug }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("agp.sqlite3")
    }

    pub fn patient_path(&self) -> PathBuf {
        self.data_dir.join("patient.json")
    }

    /// Flat key/value file written by older versions of the app.
    pub fn legacy_path(&self) -> PathBuf {
        self.data_dir.join("legacy_storage.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agp-plus")
}

/// Thresholds for the data status light.
#[derive(Debug, Clone)]
pub struct StatusThresholds {
    /// Width of the recent-data window, anchored at the newest reading.
    pub window_days: i64,
    /// Fewer readings than this inside the window turns the light yellow.
    pub min_recent_readings: usize,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            window_days: 14,
            min_recent_readings: 2000,
        }
    }
}

/// Tunables for the master dataset store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub clustering: ClusteringConfig,
    pub alert_policy: AlertPolicy,

    /// Merge key resolution; readings inside the same bucket collide.
    pub sampling_resolution_minutes: i64,

    /// Import history ring buffer size.
    pub history_capacity: usize,

    pub status: StatusThresholds,

    /// New uploads start locked against delete and rename.
    pub lock_new_uploads: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            clustering: ClusteringConfig::default(),
            alert_policy: AlertPolicy::default(),
            sampling_resolution_minutes: 5,
            history_capacity: 10,
            status: StatusThresholds::default(),
            lock_new_uploads: true,
        }
    }
}
