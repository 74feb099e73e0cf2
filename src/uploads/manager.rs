use crate::{
    dataset::{
        store::{rebuild_cache, settled},
        MasterDatasetStore, UploadOptions, UploadReport,
    },
    db::{
        models::{LoadedUpload, UploadRecord},
        repositories::{
            master_cache,
            settings::{clear_active_upload_if, set_active_upload},
            uploads,
        },
    },
    error::{StoreError, StoreResult},
    log_info,
};

const ENABLE_LOGS: bool = true;

/// Outcome of a write that is refused for missing or locked uploads.
enum Guarded<T> {
    Done(T),
    Missing,
    Locked,
}

impl<T> Guarded<T> {
    fn into_result(self, upload_id: &str) -> StoreResult<T> {
        match self {
            Guarded::Done(value) => Ok(value),
            Guarded::Missing => Err(StoreError::NotFound(format!("upload {upload_id}"))),
            Guarded::Locked => Err(StoreError::Locked(upload_id.to_string())),
        }
    }
}

/// Named, lockable upload records and the active-upload pointer.
#[derive(Clone)]
pub struct UploadManager {
    store: MasterDatasetStore,
}

impl UploadManager {
    pub fn new(store: MasterDatasetStore) -> Self {
        Self { store }
    }

    /// Ingest an export as a new upload. Uploads start locked.
    pub async fn save(&self, raw: &str, options: UploadOptions) -> StoreResult<UploadReport> {
        self.store.upload_csv_with(raw, options).await
    }

    pub async fn list(&self) -> StoreResult<Vec<UploadRecord>> {
        let _state = self.store.lock_state().await;
        Ok(self.store.db().list_uploads().await?)
    }

    pub async fn active_id(&self) -> StoreResult<Option<String>> {
        let _state = self.store.lock_state().await;
        Ok(self.store.db().get_active_upload_id().await?)
    }

    /// Make an upload the active one and return it. Nothing else changes.
    pub async fn load_by_id(&self, upload_id: &str) -> StoreResult<LoadedUpload> {
        let _state = self.store.lock_state().await;
        let id = upload_id.to_string();
        let loaded = self
            .store
            .db()
            .execute_tx(move |tx| {
                let Some(record) = uploads::get_upload(tx, &id)? else {
                    return Ok(None);
                };
                let payload = uploads::load_payload(tx, &id)?.unwrap_or_default();
                set_active_upload(tx, &id)?;
                Ok(Some(LoadedUpload { record, payload }))
            })
            .await?;

        loaded.ok_or_else(|| StoreError::NotFound(format!("upload {upload_id}")))
    }

    /// Flip the lock and return the new state.
    pub async fn toggle_lock(&self, upload_id: &str) -> StoreResult<bool> {
        let _state = self.store.lock_state().await;
        let id = upload_id.to_string();
        let outcome = self
            .store
            .db()
            .execute_tx(move |tx| {
                let Some(record) = uploads::get_upload(tx, &id)? else {
                    return Ok(Guarded::Missing);
                };
                let locked = !record.locked;
                uploads::set_locked(tx, &id, locked)?;
                Ok(Guarded::Done(locked))
            })
            .await?;

        outcome.into_result(upload_id)
    }

    pub async fn rename(&self, upload_id: &str, name: &str) -> StoreResult<()> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::validation("upload name cannot be empty"));
        }

        let _state = self.store.lock_state().await;
        let id = upload_id.to_string();
        let outcome = self
            .store
            .db()
            .execute_tx(move |tx| {
                match uploads::get_upload(tx, &id)? {
                    None => return Ok(Guarded::Missing),
                    Some(record) if record.locked => return Ok(Guarded::Locked),
                    Some(_) => {}
                }
                uploads::rename_upload(tx, &id, &name)?;
                Ok(Guarded::Done(()))
            })
            .await?;

        outcome.into_result(upload_id)
    }

    /// Remove an unlocked upload. The cache is marked stale and rebuilt from
    /// the remaining uploads in the same transaction.
    pub async fn delete(&self, upload_id: &str) -> StoreResult<()> {
        let mut state = self.store.lock_state().await;
        let id = upload_id.to_string();
        let config = self.store.config().clone();
        let outcome = self
            .store
            .db()
            .execute_tx(move |tx| {
                match uploads::get_upload(tx, &id)? {
                    None => return Ok(Guarded::Missing),
                    Some(record) if record.locked => return Ok(Guarded::Locked),
                    Some(_) => {}
                }
                uploads::delete_upload(tx, &id)?;
                clear_active_upload_if(tx, &id)?;
                master_cache::mark_stale(tx)?;
                let remaining = rebuild_cache(tx, &config)?;
                Ok(Guarded::Done(remaining.len()))
            })
            .await?;

        let remaining = outcome.into_result(upload_id)?;
        *state = settled(remaining);
        log_info!("Deleted upload {upload_id}; {remaining} readings remain");
        Ok(())
    }
}
