//! Destructive cleanup of stored data, always preceded by a backup export.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    config::StoreConfig,
    dataset::{
        backup::BackupExport,
        store::{load_or_rebuild, rebuild_cache, settled, DatasetState, MasterDatasetStore},
    },
    db::{
        models::DateRange,
        repositories::{
            device_events, master_cache,
            settings::{delete_setting, ACTIVE_UPLOAD_KEY},
            tombstones, uploads, workdays,
        },
    },
    error::{StoreError, StoreResult},
    log_error, log_info,
};

const ENABLE_LOGS: bool = true;

/// Which categories to remove. Without a `date_range` the selected
/// categories are wiped completely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOptions {
    pub readings: bool,
    pub device_events: bool,
    pub work_schedule: bool,
    pub date_range: Option<DateRange>,
}

impl CleanupOptions {
    fn validate(&self) -> StoreResult<()> {
        if !self.readings && !self.device_events && !self.work_schedule {
            return Err(StoreError::validation("select at least one category to clean up"));
        }
        if let Some(range) = self.date_range {
            if range.min > range.max {
                return Err(StoreError::validation("start date is after end date"));
            }
        }
        Ok(())
    }
}

/// What a cleanup would remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub readings: usize,
    pub uploads_affected: usize,
    pub device_events: usize,
    pub workdays: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub summary: CleanupSummary,
    pub backup_path: String,
    pub readings_removed: usize,
    pub device_events_removed: usize,
    pub workdays_removed: usize,
}

struct Removed {
    readings: usize,
    device_events: usize,
    workdays: usize,
    remaining_readings: usize,
}

impl MasterDatasetStore {
    /// Counts per category for a cleanup request, without removing anything.
    pub async fn preview_cleanup(&self, options: CleanupOptions) -> StoreResult<CleanupSummary> {
        options.validate()?;
        let _state = self.lock_state().await;
        self.summarize(options).await
    }

    /// Validate, summarize, back up, then delete in one transaction. Nothing is
    /// removed when the backup cannot be written.
    pub async fn cleanup_records(&self, options: CleanupOptions) -> StoreResult<CleanupReport> {
        options.validate()?;
        let mut state = self.lock_state().await;

        let summary = self.summarize(options.clone()).await?;

        let reason = format!("pre-cleanup: {}", summary.description);
        let mut export = self
            .db()
            .execute(move |conn| BackupExport::collect(conn, &reason))
            .await
            .map_err(StoreError::Backup)?;
        export.patient = self.patient_store().map(|patient| patient.patient());

        let sink = self.backup_sink();
        let backup_path = tokio::task::spawn_blocking(move || sink.write(&export))
            .await
            .map_err(|err| StoreError::Backup(anyhow!("backup task failed: {err}")))?
            .map_err(|err| {
                log_error!("Backup before cleanup failed, nothing deleted: {err:#}");
                StoreError::Backup(err)
            })?;

        let config = self.config().clone();
        let delete_options = options.clone();
        let removed = self
            .db()
            .execute_tx(move |tx| delete_records(tx, &delete_options, &config))
            .await?;

        *state = if options.readings && options.date_range.is_none() {
            DatasetState::Empty
        } else {
            settled(removed.remaining_readings)
        };

        log_info!(
            "Cleanup done: {} readings, {} events, {} workdays removed (backup at {})",
            removed.readings,
            removed.device_events,
            removed.workdays,
            backup_path.display()
        );

        Ok(CleanupReport {
            summary,
            backup_path: backup_path.display().to_string(),
            readings_removed: removed.readings,
            device_events_removed: removed.device_events,
            workdays_removed: removed.workdays,
        })
    }

    async fn summarize(&self, options: CleanupOptions) -> StoreResult<CleanupSummary> {
        let config = self.config().clone();
        self.db()
            .execute_tx(move |tx| build_summary(tx, &options, &config))
            .await
    }
}

fn build_summary(
    conn: &Connection,
    options: &CleanupOptions,
    config: &StoreConfig,
) -> Result<CleanupSummary> {
    let range = options.date_range;
    let mut summary = CleanupSummary::default();

    if options.readings {
        let readings = load_or_rebuild(conn, config)?;
        summary.readings = match range {
            Some(range) => readings
                .iter()
                .filter(|reading| range.contains(reading.timestamp))
                .count(),
            None => readings.len(),
        };
        summary.uploads_affected = uploads::list_uploads(conn)?
            .iter()
            .filter(|upload| match (range, upload.date_range) {
                (None, _) => true,
                (Some(range), Some(covered)) => covered.min <= range.max && covered.max >= range.min,
                (Some(_), None) => false,
            })
            .count();
    }

    if options.device_events {
        summary.device_events = device_events::load_all(conn)?
            .iter()
            .filter(|event| range.map_or(true, |range| range.contains(event.timestamp)))
            .count();
    }

    if options.work_schedule {
        summary.workdays = workdays::list_workdays(conn)?
            .iter()
            .filter(|day| {
                range.map_or(true, |range| {
                    **day >= range.min.date_naive() && **day <= range.max.date_naive()
                })
            })
            .count();
    }

    summary.description = describe(&summary, options);
    Ok(summary)
}

fn describe(summary: &CleanupSummary, options: &CleanupOptions) -> String {
    let mut parts = Vec::new();
    if options.readings {
        parts.push(format!(
            "{} glucose readings from {} uploads",
            summary.readings, summary.uploads_affected
        ));
    }
    if options.device_events {
        parts.push(format!("{} device events", summary.device_events));
    }
    if options.work_schedule {
        parts.push(format!("{} workdays", summary.workdays));
    }

    let scope = match options.date_range {
        Some(range) => format!(
            "between {} and {}",
            range.min.format("%Y-%m-%d"),
            range.max.format("%Y-%m-%d")
        ),
        None => "(all data)".to_string(),
    };
    format!("Delete {} {}", parts.join(", "), scope)
}

fn delete_records(
    conn: &Connection,
    options: &CleanupOptions,
    config: &StoreConfig,
) -> Result<Removed> {
    let mut removed = Removed {
        readings: 0,
        device_events: 0,
        workdays: 0,
        remaining_readings: 0,
    };

    if options.readings {
        let before = load_or_rebuild(conn, config)?.len();
        match options.date_range {
            None => {
                uploads::delete_all_uploads(conn)?;
                master_cache::clear_cache(conn)?;
                tombstones::clear_reading_tombstones(conn)?;
                delete_setting(conn, ACTIVE_UPLOAD_KEY)?;
                removed.readings = before;
            }
            Some(range) => {
                // Hides the range for every upload stored so far; later
                // uploads may fill it again.
                let applies_before = uploads::last_upload_seq(conn)? + 1;
                tombstones::insert_reading_tombstone(conn, range, applies_before)?;
                master_cache::mark_stale(conn)?;
                let remaining = rebuild_cache(conn, config)?;
                removed.readings = before.saturating_sub(remaining.len());
                removed.remaining_readings = remaining.len();
            }
        }
    } else {
        removed.remaining_readings = master_cache::load_valid_stats(conn)?
            .map(|stats| stats.total_count)
            .unwrap_or(0);
    }

    if options.device_events {
        removed.device_events = match options.date_range {
            Some(range) => device_events::delete_in_range(conn, range)?,
            None => device_events::delete_all(conn)?,
        };
    }

    if options.work_schedule {
        removed.workdays = match options.date_range {
            Some(range) => workdays::delete_workdays_between(
                conn,
                range.min.date_naive(),
                range.max.date_naive(),
            )?,
            None => workdays::delete_all_workdays(conn)?,
        };
    }

    Ok(removed)
}
