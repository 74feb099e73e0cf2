use crate::{
    db::models::{LoadedUpload, UploadRecord},
    uploads::{migrate_legacy, MigrationReport},
    AppState,
};

pub async fn list_uploads(state: &AppState) -> Result<Vec<UploadRecord>, String> {
    state.uploads.list().await.map_err(|e| e.to_string())
}

pub async fn load_upload(state: &AppState, upload_id: String) -> Result<LoadedUpload, String> {
    state
        .uploads
        .load_by_id(&upload_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn toggle_upload_lock(state: &AppState, upload_id: String) -> Result<bool, String> {
    state
        .uploads
        .toggle_lock(&upload_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn rename_upload(
    state: &AppState,
    upload_id: String,
    name: String,
) -> Result<(), String> {
    state
        .uploads
        .rename(&upload_id, &name)
        .await
        .map_err(|e| e.to_string())
}

pub async fn delete_upload(state: &AppState, upload_id: String) -> Result<(), String> {
    state
        .uploads
        .delete(&upload_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_active_upload_id(state: &AppState) -> Result<Option<String>, String> {
    state.uploads.active_id().await.map_err(|e| e.to_string())
}

pub async fn migrate_legacy_storage(state: &AppState) -> Result<MigrationReport, String> {
    migrate_legacy(&state.store, &state.legacy)
        .await
        .map_err(|e| e.to_string())
}
