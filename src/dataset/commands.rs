use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

use crate::{
    dataset::{
        derive_status, CleanupOptions, CleanupReport, CleanupSummary, DataStatus, UploadOptions,
        UploadReport, WorkdayImportReport,
    },
    db::models::{
        AmbiguousGroup, DatasetStats, DeviceEvent, DeviceEventKind, DeviceEvents,
        ImportHistoryEntry, MasterDataset,
    },
    AppState,
};

pub async fn upload_csv(
    state: &AppState,
    csv_text: String,
    options: Option<UploadOptions>,
) -> Result<UploadReport, String> {
    state
        .store
        .upload_csv_with(&csv_text, options.unwrap_or_default())
        .await
        .map_err(|e| e.to_string())
}

pub async fn load_or_rebuild_cache(state: &AppState) -> Result<MasterDataset, String> {
    state
        .store
        .load_or_rebuild_cache()
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_master_dataset_stats(state: &AppState) -> Result<DatasetStats, String> {
    state
        .store
        .get_master_dataset_stats()
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_data_status(state: &AppState) -> Result<DataStatus, String> {
    let dataset = state
        .store
        .load_or_rebuild_cache()
        .await
        .map_err(|e| e.to_string())?;
    Ok(derive_status(
        &dataset.all_readings,
        &state.store.config().status,
    ))
}

pub async fn invalidate_cache(state: &AppState) -> Result<(), String> {
    state
        .store
        .invalidate_cache()
        .await
        .map_err(|e| e.to_string())
}

pub async fn preview_cleanup(
    state: &AppState,
    options: CleanupOptions,
) -> Result<CleanupSummary, String> {
    state
        .store
        .preview_cleanup(options)
        .await
        .map_err(|e| e.to_string())
}

pub async fn cleanup_records(
    state: &AppState,
    options: CleanupOptions,
) -> Result<CleanupReport, String> {
    state
        .store
        .cleanup_records(options)
        .await
        .map_err(|e| e.to_string())
}

pub async fn list_device_events(state: &AppState) -> Result<DeviceEvents, String> {
    state
        .store
        .list_device_events()
        .await
        .map_err(|e| e.to_string())
}

pub async fn delete_device_event(
    state: &AppState,
    kind: DeviceEventKind,
    timestamp: DateTime<Utc>,
) -> Result<(), String> {
    state
        .store
        .delete_device_event(kind, timestamp)
        .await
        .map_err(|e| e.to_string())
}

pub async fn resolve_ambiguous_group(
    state: &AppState,
    group: AmbiguousGroup,
    chosen: DateTime<Utc>,
) -> Result<DeviceEvent, String> {
    state
        .store
        .resolve_ambiguous_group(group, chosen)
        .await
        .map_err(|e| e.to_string())
}

pub async fn import_workdays(
    state: &AppState,
    text: String,
    source: Option<String>,
) -> Result<WorkdayImportReport, String> {
    state
        .store
        .import_workdays(&text, source)
        .await
        .map_err(|e| e.to_string())
}

pub async fn list_workdays(state: &AppState) -> Result<BTreeSet<NaiveDate>, String> {
    state
        .store
        .list_workdays()
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_import_history(state: &AppState) -> Result<Vec<ImportHistoryEntry>, String> {
    state
        .store
        .import_history()
        .await
        .map_err(|e| e.to_string())
}

pub async fn clear_import_history(state: &AppState) -> Result<usize, String> {
    state
        .store
        .clear_import_history()
        .await
        .map_err(|e| e.to_string())
}
