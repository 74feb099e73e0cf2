pub mod clustering;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod parsing;
pub mod settings;
pub mod uploads;
pub mod utils;

#[cfg(test)]
mod test_support;

use std::{fs, sync::Arc};

use anyhow::{Context, Result};

pub use config::{AppConfig, StoreConfig};
pub use dataset::{DatasetState, MasterDatasetStore, UploadOptions, UploadReport};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use parsing::ParseError;
pub use settings::{PatientInfo, SettingsStore};
pub use uploads::{LegacyStore, UploadManager};

use dataset::FileBackupSink;
use uploads::migrate_legacy;

const ENABLE_LOGS: bool = true;

/// Everything the command layer needs, wired against one data directory.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub store: MasterDatasetStore,
    pub uploads: UploadManager,
    pub settings: Arc<SettingsStore>,
    pub legacy: LegacyStore,
}

impl AppState {
    /// Open storage under `config.data_dir`, move legacy uploads over when a
    /// legacy file is present, and warm the master cache.
    pub async fn initialize(config: AppConfig, store_config: StoreConfig) -> Result<Self> {
        utils::init_logging(config.debug);
        log_info!("AGP+ starting up in {}", config.data_dir.display());

        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data dir {}", config.data_dir.display())
        })?;

        let db = Database::new(config.db_path())?;
        let settings = Arc::new(SettingsStore::new(config.patient_path())?);
        let backup = Arc::new(FileBackupSink::new(config.backup_dir()));

        let store = MasterDatasetStore::new(db.clone(), backup)
            .with_config(store_config)
            .with_patient_store(Arc::clone(&settings));
        let legacy = LegacyStore::new(config.legacy_path());

        if legacy.exists() {
            let report = migrate_legacy(&store, &legacy).await?;
            if !report.failed.is_empty() {
                log_warn!(
                    "{} legacy uploads could not be migrated; they stay in {}",
                    report.failed.len(),
                    config.legacy_path().display()
                );
            }
        }

        let dataset = store.load_or_rebuild_cache().await?;
        log_info!("Master dataset ready with {} readings", dataset.all_readings.len());

        Ok(Self {
            config,
            db,
            uploads: UploadManager::new(store.clone()),
            store,
            settings,
            legacy,
        })
    }

    /// Wait for in-flight operations, then stop the database worker.
    pub async fn shutdown(&self) {
        self.store.close().await;
        log_info!("AGP+ shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{carelink_csv, glucose_series, ts};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn initialize_migrates_legacy_file_and_serves_commands() {
        let dir = tempdir().unwrap();
        let config = AppConfig::new(dir.path().to_path_buf());
        let legacy_uploads = json!([{
            "id": "upload_legacy",
            "timestamp": "2025-10-02T10:00:00.000Z",
            "csvData": carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 100)),
        }]);
        fs::write(
            config.legacy_path(),
            json!({"agp_uploads": legacy_uploads.to_string()}).to_string(),
        )
        .unwrap();

        let state = AppState::initialize(config, StoreConfig::default())
            .await
            .unwrap();
        assert_eq!(state.store.state().await, DatasetState::Ready);

        let listed = uploads::commands::list_uploads(&state).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].locked);

        let stats = dataset::commands::get_master_dataset_stats(&state)
            .await
            .unwrap();
        assert_eq!(stats.total_count, 6);

        let err = uploads::commands::delete_upload(&state, "upload_legacy".into())
            .await
            .unwrap_err();
        assert!(err.contains("locked"));

        let status = dataset::commands::get_data_status(&state).await.unwrap();
        assert_eq!(status.light_color, dataset::StatusLight::Yellow);

        let rerun = uploads::commands::migrate_legacy_storage(&state).await.unwrap();
        assert!(rerun.already_migrated);

        assert!(!uploads::commands::toggle_upload_lock(&state, "upload_legacy".into())
            .await
            .unwrap());
        let loaded = uploads::commands::load_upload(&state, "upload_legacy".into())
            .await
            .unwrap();
        assert_eq!(loaded.payload.readings.len(), 6);

        state.shutdown().await;
    }
}
