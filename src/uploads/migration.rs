//! One-time import of legacy uploads into the structured record set.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{
        store::{rebuild_cache, settled, PreparedUpload},
        MasterDatasetStore,
    },
    db::{
        models::ImportStrategy,
        repositories::{
            device_events, master_cache,
            settings::{get_setting, set_active_upload, set_setting, LEGACY_MIGRATION_KEY},
            uploads, workdays,
        },
    },
    error::StoreResult,
    log_info, log_warn,
    uploads::legacy::{LegacyStore, LegacyUpload, LEGACY_ACTIVE_KEY, LEGACY_UPLOADS_KEY},
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// The marker was already set; nothing was read.
    pub already_migrated: bool,
    pub migrated: Vec<String>,
    /// Ids already present in the record set.
    pub skipped: Vec<String>,
    pub failed: Vec<MigrationFailure>,
    /// Legacy keys were verified and removed.
    pub legacy_removed: bool,
}

/// Move legacy uploads into the database.
///
/// Each upload is written in its own transaction, so a rerun after a partial
/// failure only retries what is missing. The marker is set and the legacy keys
/// are removed only when every upload made it and is verified present.
pub async fn migrate_legacy(
    store: &MasterDatasetStore,
    legacy: &LegacyStore,
) -> StoreResult<MigrationReport> {
    let mut state = store.lock_state().await;

    let marker = store
        .db()
        .execute(|conn| get_setting(conn, LEGACY_MIGRATION_KEY))
        .await?;
    if marker.is_some() {
        return Ok(MigrationReport {
            already_migrated: true,
            ..Default::default()
        });
    }

    if !legacy.exists() {
        store
            .db()
            .execute(|conn| set_setting(conn, LEGACY_MIGRATION_KEY, &Utc::now().to_rfc3339()))
            .await?;
        log_info!("No legacy storage found; nothing to migrate");
        return Ok(MigrationReport::default());
    }

    let read = legacy.uploads()?;
    let legacy_active = legacy.active_id()?;

    let mut report = MigrationReport::default();
    for entry in read.unreadable {
        report.failed.push(MigrationFailure {
            id: format!("entry #{}", entry.index),
            reason: entry.reason,
        });
    }

    let mut pending = read.uploads;
    pending.sort_by_key(saved_at);

    for upload in &pending {
        let id = upload.id.clone();
        let exists = {
            let id = id.clone();
            store
                .db()
                .execute(move |conn| uploads::upload_exists(conn, &id))
                .await?
        };
        if exists {
            report.skipped.push(id);
            continue;
        }

        match migrate_one(store, upload).await {
            Ok(()) => report.migrated.push(id),
            Err(err) => {
                log_warn!("Legacy upload {id} not migrated: {err}");
                report.failed.push(MigrationFailure {
                    id,
                    reason: err.to_string(),
                });
            }
        }
    }

    let config = store.config().clone();
    let complete = report.failed.is_empty();
    let candidates: Vec<String> = legacy_active
        .into_iter()
        .chain(report.migrated.last().cloned())
        .collect();
    let remaining = store
        .db()
        .execute_tx(move |tx| {
            master_cache::mark_stale(tx)?;
            let readings = rebuild_cache(tx, &config)?;
            // legacy pointer first, then the newest migrated upload
            for id in &candidates {
                if uploads::upload_exists(tx, id)? {
                    set_active_upload(tx, id)?;
                    break;
                }
            }
            if complete {
                set_setting(tx, LEGACY_MIGRATION_KEY, &Utc::now().to_rfc3339())?;
            }
            Ok(readings.len())
        })
        .await?;
    *state = settled(remaining);

    if complete {
        let ids: Vec<String> = pending.iter().map(|upload| upload.id.clone()).collect();
        let verified = store
            .db()
            .execute(move |conn| {
                for id in &ids {
                    if !uploads::upload_exists(conn, id)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            })
            .await?;

        if verified {
            legacy.remove_keys(&[LEGACY_UPLOADS_KEY, LEGACY_ACTIVE_KEY])?;
            report.legacy_removed = true;
        } else {
            log_warn!("Legacy uploads missing after migration; keeping legacy copy");
        }
    } else {
        log_warn!(
            "{} legacy uploads failed; keeping legacy copy for a retry",
            report.failed.len()
        );
    }

    log_info!(
        "Legacy migration: {} migrated, {} skipped, {} failed",
        report.migrated.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

async fn migrate_one(store: &MasterDatasetStore, upload: &LegacyUpload) -> StoreResult<()> {
    let timestamp = saved_at(upload);
    let PreparedUpload {
        record,
        payload,
        clusters,
        ..
    } = store.prepare_upload(
        &upload.csv_data,
        upload.id.clone(),
        timestamp,
        upload.name.clone(),
        None,
        ImportStrategy::Append,
        upload.locked,
    )?;

    let days: BTreeSet<NaiveDate> = upload
        .pro_time_data
        .iter()
        .flatten()
        .filter_map(|raw| NaiveDate::parse_from_str(&raw.replace('-', "/"), "%Y/%m/%d").ok())
        .collect();

    store
        .db()
        .execute_tx(move |tx| {
            let mut record = record;
            record.seq = uploads::next_upload_seq(tx)?;
            uploads::insert_upload(tx, &record, &payload)?;
            device_events::insert_confirmed(tx, &clusters.confirmed, Some(&record.id))?;
            workdays::insert_workdays(tx, &days, Some("legacy"))?;
            Ok(())
        })
        .await
}

/// Save time of a legacy upload; unreadable values sort last.
fn saved_at(upload: &LegacyUpload) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&upload.timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
