use std::{collections::BTreeSet, sync::Arc, time::Instant};

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    clustering::{cluster_alerts, resolve_group, ClusterResult},
    config::StoreConfig,
    dataset::{
        backup::BackupSink,
        merge::{
            merge_batch, merge_readings, normalize_incoming, truncate_to_minute, MergeStats,
            TimestampBounds,
        },
    },
    db::{
        models::{
            AmbiguousGroup, DatasetStats, DateRange, DeviceEvent, DeviceEventKind, DeviceEvents,
            ImportHistoryEntry, ImportStrategy, MasterDataset, Reading, UploadPayload,
            UploadRecord,
        },
        repositories::{
            device_events, import_history, master_cache,
            settings::set_active_upload,
            tombstones::{load_reading_tombstones, remove_event_tombstone},
            uploads, workdays,
        },
        Database,
    },
    error::{StoreError, StoreResult},
    log_info, log_warn,
    parsing::{
        CareLinkParser, CsvMetadata, ParseError, ProTimeParser, RowProducer, WorkdayParser,
    },
    settings::SettingsStore,
};

const ENABLE_LOGS: bool = true;

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mrt", "Apr", "Mei", "Jun", "Jul", "Aug", "Sep", "Okt", "Nov", "Dec",
];

/// Lifecycle of the in-memory view of the canonical dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatasetState {
    /// No readings stored (or not loaded yet).
    Empty,
    Loading,
    Ready,
    /// The persisted cache must be rebuilt before it is trusted again.
    Stale,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub filename: Option<String>,
    pub name: Option<String>,
    pub strategy: ImportStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub upload_id: String,
    pub strategy: ImportStrategy,
    pub stats: DatasetStats,
    pub merge: MergeStats,
    /// Events newly stored by this upload.
    pub confirmed_events: Vec<DeviceEvent>,
    /// Groups the user has to resolve; nothing was stored for them.
    pub ambiguous_groups: Vec<AmbiguousGroup>,
    pub exception_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkdayImportReport {
    pub parsed: usize,
    pub added: usize,
}

/// A parsed, normalized and clustered upload that has not been written yet.
#[derive(Debug, Clone)]
pub(crate) struct PreparedUpload {
    pub record: UploadRecord,
    pub payload: UploadPayload,
    pub clusters: ClusterResult,
    pub metadata: CsvMetadata,
    pub exception_count: usize,
    pub dropped: usize,
}

/// Owner of the canonical reading set and everything derived from it.
///
/// Cheap to clone; clones share the database worker and the state lock, which
/// is held for the full duration of every operation.
#[derive(Clone)]
pub struct MasterDatasetStore {
    db: Database,
    config: Arc<StoreConfig>,
    producer: Arc<dyn RowProducer>,
    workday_parser: Arc<dyn WorkdayParser>,
    backup: Arc<dyn BackupSink>,
    patient: Option<Arc<SettingsStore>>,
    state: Arc<Mutex<DatasetState>>,
}

impl MasterDatasetStore {
    pub fn new(db: Database, backup: Arc<dyn BackupSink>) -> Self {
        Self {
            db,
            config: Arc::new(StoreConfig::default()),
            producer: Arc::new(CareLinkParser),
            workday_parser: Arc::new(ProTimeParser),
            backup,
            patient: None,
            state: Arc::new(Mutex::new(DatasetState::Empty)),
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_row_producer(mut self, producer: Arc<dyn RowProducer>) -> Self {
        self.producer = producer;
        self
    }

    pub fn with_workday_parser(mut self, parser: Arc<dyn WorkdayParser>) -> Self {
        self.workday_parser = parser;
        self
    }

    pub fn with_patient_store(mut self, patient: Arc<SettingsStore>) -> Self {
        self.patient = Some(patient);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn backup_sink(&self) -> Arc<dyn BackupSink> {
        Arc::clone(&self.backup)
    }

    pub(crate) fn patient_store(&self) -> Option<&Arc<SettingsStore>> {
        self.patient.as_ref()
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, DatasetState> {
        self.state.lock().await
    }

    pub async fn state(&self) -> DatasetState {
        *self.state.lock().await
    }

    /// Return the canonical dataset, rebuilding the persisted cache from the
    /// upload records first when it is missing or stale.
    pub async fn load_or_rebuild_cache(&self) -> StoreResult<MasterDataset> {
        let mut state = self.state.lock().await;
        let previous = *state;
        *state = DatasetState::Loading;

        let config = Arc::clone(&self.config);
        let result = self
            .db
            .execute_tx(move |tx| {
                let (readings, rebuilt) = match master_cache::load_valid_readings(tx)? {
                    Some(readings) => (readings, false),
                    None => (rebuild_cache(tx, &config)?, true),
                };
                let events = device_events::load_grouped(tx)?;
                Ok((readings, events, rebuilt))
            })
            .await;

        match result {
            Ok((readings, events, rebuilt)) => {
                if rebuilt {
                    log_info!("Rebuilt master cache: {} readings", readings.len());
                }
                *state = settled(readings.len());
                Ok(MasterDataset::new(readings, events))
            }
            Err(err) => {
                *state = previous;
                Err(err)
            }
        }
    }

    /// Stats from the cache columns; only rebuilds when the cache is invalid.
    pub async fn get_master_dataset_stats(&self) -> StoreResult<DatasetStats> {
        let mut state = self.state.lock().await;
        let previous = *state;
        *state = DatasetState::Loading;

        let config = Arc::clone(&self.config);
        let result = self
            .db
            .execute_tx(move |tx| {
                if let Some(stats) = master_cache::load_valid_stats(tx)? {
                    return Ok(stats);
                }
                let readings = rebuild_cache(tx, &config)?;
                Ok(DatasetStats::from_sorted(&readings))
            })
            .await;

        match result {
            Ok(stats) => {
                *state = settled(stats.total_count);
                Ok(stats)
            }
            Err(err) => {
                *state = previous;
                Err(err)
            }
        }
    }

    /// Mark the persisted cache stale; the next read rebuilds it.
    pub async fn invalidate_cache(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.db
            .execute(|conn| master_cache::mark_stale(conn))
            .await?;
        *state = DatasetState::Stale;
        Ok(())
    }

    pub async fn upload_csv(&self, raw: &str) -> StoreResult<UploadReport> {
        self.upload_csv_with(raw, UploadOptions::default()).await
    }

    /// Parse, cluster and merge one export. Everything is written in a single
    /// transaction; a parse failure leaves the store untouched.
    pub async fn upload_csv_with(
        &self,
        raw: &str,
        options: UploadOptions,
    ) -> StoreResult<UploadReport> {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        let upload_id = Uuid::new_v4().to_string();
        let prepared = self.prepare_upload(
            raw,
            upload_id.clone(),
            Utc::now(),
            options.name,
            options.filename,
            options.strategy,
            self.config.lock_new_uploads,
        )?;

        let config = Arc::clone(&self.config);
        let strategy = options.strategy;
        let PreparedUpload {
            record,
            payload,
            clusters,
            metadata,
            exception_count,
            dropped,
        } = prepared;
        let confirmed = clusters.confirmed;
        let ambiguous_groups = clusters.ambiguous;
        let history_entry = ImportHistoryEntry {
            id: Uuid::new_v4().to_string(),
            filename: record
                .filename
                .clone()
                .unwrap_or_else(|| record.name.clone()),
            record_count: payload.readings.len(),
            duration_ms: 0,
            strategy,
            exception_count: exception_count + dropped,
            timestamp: record.timestamp,
        };

        let (stats, merge, stored_events) = self
            .db
            .execute_tx(move |tx| {
                let mut record = record;
                record.seq = uploads::next_upload_seq(tx)?;

                let existing = match strategy {
                    ImportStrategy::Append => load_or_rebuild(tx, &config)?,
                    ImportStrategy::Replace => {
                        uploads::mark_superseded_before(tx, record.seq)?;
                        Vec::new()
                    }
                };

                uploads::insert_upload(tx, &record, &payload)?;

                let mut outcome =
                    merge_readings(existing, payload.readings, config.sampling_resolution_minutes);
                outcome.stats.dropped = dropped;
                let stats = master_cache::save_cache(tx, &outcome.readings)?;

                let stored = device_events::insert_confirmed(tx, &confirmed, Some(&record.id))?;
                set_active_upload(tx, &record.id)?;

                let mut entry = history_entry;
                entry.duration_ms = elapsed_ms(started);
                import_history::append_entry(tx, &entry, config.history_capacity)?;

                Ok((stats, outcome.stats, stored))
            })
            .await?;

        *state = settled(stats.total_count);
        drop(state);

        self.sync_patient_metadata(&metadata);

        log_info!(
            "Upload {} stored: +{} new, {} replaced, {} events, {} ambiguous",
            upload_id,
            merge.added,
            merge.replaced,
            stored_events.len(),
            ambiguous_groups.len()
        );

        Ok(UploadReport {
            upload_id,
            strategy,
            stats,
            merge,
            confirmed_events: stored_events,
            ambiguous_groups,
            exception_count: exception_count + dropped,
            duration_ms: elapsed_ms(started),
        })
    }

    /// Parse and normalize an export without touching storage.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prepare_upload(
        &self,
        raw: &str,
        upload_id: String,
        timestamp: DateTime<Utc>,
        name: Option<String>,
        filename: Option<String>,
        strategy: ImportStrategy,
        locked: bool,
    ) -> StoreResult<PreparedUpload> {
        let parsed = self.producer.parse(raw)?;
        let bounds = TimestampBounds::relative_to(Utc::now());

        let (readings, dropped) = normalize_incoming(
            parsed.readings(&upload_id),
            self.config.sampling_resolution_minutes,
            bounds,
        );
        if readings.is_empty() {
            return Err(ParseError::NoReadings {
                checked: parsed.rows.len(),
            }
            .into());
        }

        let alerts: Vec<_> = parsed
            .alert_rows()
            .into_iter()
            .filter(|alert| bounds.contains(alert.timestamp))
            .map(|mut alert| {
                alert.timestamp = truncate_to_minute(alert.timestamp);
                alert
            })
            .collect();
        let clusters = cluster_alerts(&alerts, &self.config.alert_policy, &self.config.clustering);

        let date_range = DateRange::of_sorted(&readings);
        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| auto_name(date_range));

        let record = UploadRecord {
            id: upload_id,
            seq: 0,
            timestamp,
            name,
            filename,
            locked,
            strategy,
            superseded: false,
            date_range,
            reading_count: readings.len(),
        };

        Ok(PreparedUpload {
            record,
            payload: UploadPayload { readings, alerts },
            clusters,
            metadata: parsed.metadata,
            exception_count: parsed.exceptions.len(),
            dropped,
        })
    }

    /// Header metadata into the patient record. Best effort: failures are
    /// logged, never returned.
    pub(crate) fn sync_patient_metadata(&self, metadata: &CsvMetadata) {
        let Some(patient) = &self.patient else {
            return;
        };
        match patient.sync_device_metadata(metadata) {
            Ok(true) => log_info!("Patient device metadata updated from upload header"),
            Ok(false) => {}
            Err(err) => log_warn!("Failed to sync patient metadata: {err:#}"),
        }
    }

    pub async fn list_device_events(&self) -> StoreResult<DeviceEvents> {
        let _state = self.state.lock().await;
        Ok(self.db.list_device_events().await?)
    }

    /// Delete a confirmed event. A tombstone keeps re-uploads from bringing it
    /// back.
    pub async fn delete_device_event(
        &self,
        kind: DeviceEventKind,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let _state = self.state.lock().await;
        let deleted = self
            .db
            .execute_tx(move |tx| device_events::delete_event(tx, kind, timestamp))
            .await?;

        if !deleted {
            return Err(StoreError::NotFound(format!(
                "{} event at {}",
                kind.as_str(),
                timestamp
            )));
        }
        Ok(())
    }

    /// Store the user's pick for an ambiguous group as a low-confidence event.
    /// An explicit pick overrides an earlier deletion of the same event.
    pub async fn resolve_ambiguous_group(
        &self,
        group: AmbiguousGroup,
        chosen: DateTime<Utc>,
    ) -> StoreResult<DeviceEvent> {
        let event = resolve_group(&group, chosen).ok_or_else(|| {
            StoreError::validation("chosen timestamp is not one of the group's alerts")
        })?;

        let _state = self.state.lock().await;
        let to_store = event.clone();
        self.db
            .execute_tx(move |tx| {
                remove_event_tombstone(tx, to_store.kind, to_store.timestamp)?;
                device_events::insert_confirmed(tx, std::slice::from_ref(&to_store), None)?;
                Ok(())
            })
            .await?;

        Ok(event)
    }

    pub async fn import_workdays(
        &self,
        raw: &str,
        source: Option<String>,
    ) -> StoreResult<WorkdayImportReport> {
        let days = self
            .workday_parser
            .parse_workdays(raw, Utc::now().year())?;
        let parsed = days.len();

        let _state = self.state.lock().await;
        let added = self
            .db
            .execute(move |conn| workdays::insert_workdays(conn, &days, source.as_deref()))
            .await?;

        log_info!("Imported {parsed} workdays ({added} new)");
        Ok(WorkdayImportReport { parsed, added })
    }

    pub async fn list_workdays(&self) -> StoreResult<BTreeSet<NaiveDate>> {
        let _state = self.state.lock().await;
        Ok(self.db.list_workdays().await?)
    }

    /// Newest first, capped at the configured history capacity.
    pub async fn import_history(&self) -> StoreResult<Vec<ImportHistoryEntry>> {
        let _state = self.state.lock().await;
        Ok(self.db.get_import_history().await?)
    }

    pub async fn clear_import_history(&self) -> StoreResult<usize> {
        let _state = self.state.lock().await;
        Ok(self.db.clear_import_history().await?)
    }

    /// Stop the database worker. Later operations fail with a storage error.
    pub async fn close(&self) {
        let _state = self.state.lock().await;
        self.db.close().await;
    }
}

/// Cached readings when valid, otherwise a fresh rebuild.
pub(crate) fn load_or_rebuild(conn: &Connection, config: &StoreConfig) -> Result<Vec<Reading>> {
    match master_cache::load_valid_readings(conn)? {
        Some(readings) => Ok(readings),
        None => rebuild_cache(conn, config),
    }
}

/// Replay every non-superseded upload oldest first, drop readings hidden by
/// reading tombstones, and persist the result. A replace upload discards
/// whatever older uploads contributed. Deterministic for a given set of
/// records.
pub(crate) fn rebuild_cache(conn: &Connection, config: &StoreConfig) -> Result<Vec<Reading>> {
    let replay = uploads::load_replay_set(conn)?;
    let tombstones = load_reading_tombstones(conn)?;
    let bounds = TimestampBounds::relative_to(Utc::now());

    let mut readings = Vec::new();
    for upload in replay {
        if upload.strategy == ImportStrategy::Replace {
            readings.clear();
        }
        let seq = upload.seq;
        let visible: Vec<Reading> = upload
            .payload
            .readings
            .into_iter()
            .filter(|reading| {
                !tombstones
                    .iter()
                    .any(|tombstone| tombstone.hides(seq, reading.timestamp))
            })
            .collect();
        readings = merge_batch(
            readings,
            visible,
            config.sampling_resolution_minutes,
            bounds,
        )
        .readings;
    }

    master_cache::save_cache(conn, &readings)?;
    Ok(readings)
}

pub(crate) fn settled(reading_count: usize) -> DatasetState {
    if reading_count == 0 {
        DatasetState::Empty
    } else {
        DatasetState::Ready
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// "Okt 2025" or "Sep-Okt 2025" from the covered range.
fn auto_name(range: Option<DateRange>) -> String {
    let Some(range) = range else {
        return "Unnamed Upload".to_string();
    };
    let start = MONTH_NAMES[range.min.month0() as usize];
    let end = MONTH_NAMES[range.max.month0() as usize];
    let year = range.min.year();
    if start == end {
        format!("{start} {year}")
    } else {
        format!("{start}-{end} {year}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::merge::is_canonical,
        db::models::Confidence,
        parsing::{CsvRow, ParsedExport},
        test_support::{carelink_csv, glucose_series, temp_store, ts, CsvLine},
    };

    #[tokio::test]
    async fn empty_store_loads_empty_dataset() {
        let (_dir, store) = temp_store().await;

        let dataset = store.load_or_rebuild_cache().await.unwrap();
        assert!(dataset.is_empty());
        assert_eq!(store.state().await, DatasetState::Empty);
    }

    #[tokio::test]
    async fn upload_merges_and_reports() {
        let (_dir, store) = temp_store().await;
        let mut lines = glucose_series(ts(2025, 10, 1, 8, 0), 12, 110);
        lines.push(CsvLine::alert(ts(2025, 10, 1, 8, 2), "SENSOR CONNECTED"));

        let report = store
            .upload_csv_with(
                &carelink_csv(&lines),
                UploadOptions {
                    filename: Some("oct.csv".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.merge.added, 12);
        assert_eq!(report.stats.total_count, 12);
        assert_eq!(report.confirmed_events.len(), 1);
        assert_eq!(report.confirmed_events[0].confidence, Confidence::High);
        assert_eq!(store.state().await, DatasetState::Ready);

        let dataset = store.load_or_rebuild_cache().await.unwrap();
        assert_eq!(dataset.all_readings.len(), 12);
        assert!(is_canonical(&dataset.all_readings, 5));
        assert_eq!(dataset.events.sensor_changes.len(), 1);

        let record = store.db().get_upload(&report.upload_id).await.unwrap().unwrap();
        assert!(record.locked);
        assert_eq!(record.name, "Okt 2025");
        assert_eq!(
            store.db().get_active_upload_id().await.unwrap(),
            Some(report.upload_id)
        );
    }

    #[tokio::test]
    async fn parse_failure_leaves_store_untouched() {
        let (_dir, store) = temp_store().await;
        store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 100)))
            .await
            .unwrap();
        let before = store.db().master_cache_blob().await.unwrap();

        let err = store.upload_csv("not a carelink export").await.unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));

        assert_eq!(store.db().master_cache_blob().await.unwrap(), before);
        assert_eq!(store.db().list_uploads().await.unwrap().len(), 1);
        assert_eq!(store.import_history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_everything() {
        let (_dir, store) = temp_store().await;
        store
            .db()
            .execute(|conn| {
                conn.execute_batch("DROP TABLE import_history")?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 100)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageWrite(_)));

        assert!(store.db().list_uploads().await.unwrap().is_empty());
        assert!(store.db().master_cache_blob().await.unwrap().is_none());
        assert!(store.db().get_active_upload_id().await.unwrap().is_none());
        assert!(store.list_device_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reuploading_older_export_takes_its_values_back() {
        let (_dir, store) = temp_store().await;
        let a = carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 100));
        let b = carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 200));

        store.upload_csv(&a).await.unwrap();
        store.upload_csv(&b).await.unwrap();
        let report = store.upload_csv(&a).await.unwrap();
        assert_eq!(report.merge.replaced, 6);

        let dataset = store.load_or_rebuild_cache().await.unwrap();
        assert!(dataset.all_readings.iter().all(|r| r.glucose_value == 100));
    }

    #[tokio::test]
    async fn rebuild_is_deterministic() {
        let (_dir, store) = temp_store().await;
        store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 24, 100)))
            .await
            .unwrap();
        store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, 1, 9, 0), 24, 180)))
            .await
            .unwrap();
        let incremental = store.db().master_cache_blob().await.unwrap();

        store.invalidate_cache().await.unwrap();
        assert_eq!(store.state().await, DatasetState::Stale);
        store.load_or_rebuild_cache().await.unwrap();
        let first = store.db().master_cache_blob().await.unwrap();

        store.invalidate_cache().await.unwrap();
        store.load_or_rebuild_cache().await.unwrap();
        let second = store.db().master_cache_blob().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, incremental);
        assert_eq!(store.state().await, DatasetState::Ready);
    }

    #[tokio::test]
    async fn replace_supersedes_earlier_uploads() {
        let (_dir, store) = temp_store().await;
        store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 9, 1, 8, 0), 6, 100)))
            .await
            .unwrap();

        let report = store
            .upload_csv_with(
                &carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 3, 150)),
                UploadOptions {
                    strategy: ImportStrategy::Replace,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.stats.total_count, 3);

        store.invalidate_cache().await.unwrap();
        let dataset = store.load_or_rebuild_cache().await.unwrap();
        assert_eq!(dataset.all_readings.len(), 3);

        let uploads = store.db().list_uploads().await.unwrap();
        assert!(uploads[0].superseded);
        assert!(!uploads[1].superseded);
    }

    #[tokio::test]
    async fn history_is_capped_newest_first() {
        let (_dir, store) = temp_store().await;
        for day in 1..=12 {
            store
                .upload_csv_with(
                    &carelink_csv(&glucose_series(ts(2025, 10, day, 8, 0), 2, 100)),
                    UploadOptions {
                        filename: Some(format!("day{day}.csv")),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let history = store.import_history().await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].filename, "day12.csv");
        assert_eq!(history[9].filename, "day3.csv");
    }

    #[tokio::test]
    async fn deleted_events_stay_deleted_after_reupload() {
        let (_dir, store) = temp_store().await;
        let mut lines = glucose_series(ts(2025, 10, 1, 8, 0), 6, 110);
        lines.push(CsvLine::rewind(ts(2025, 10, 1, 8, 10)));
        let csv = carelink_csv(&lines);

        store.upload_csv(&csv).await.unwrap();
        store
            .delete_device_event(DeviceEventKind::CartridgeChange, ts(2025, 10, 1, 8, 10))
            .await
            .unwrap();

        let report = store.upload_csv(&csv).await.unwrap();
        assert!(report.confirmed_events.is_empty());
        assert!(store.list_device_events().await.unwrap().is_empty());

        let missing = store
            .delete_device_event(DeviceEventKind::CartridgeChange, ts(2025, 10, 1, 8, 10))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn ambiguous_groups_are_reported_and_resolvable() {
        let (_dir, store) = temp_store().await;
        let mut lines = glucose_series(ts(2025, 10, 1, 8, 0), 6, 110);
        lines.push(CsvLine::alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"));
        lines.push(CsvLine::alert(ts(2025, 10, 1, 11, 0), "CHANGE SENSOR"));

        let report = store.upload_csv(&carelink_csv(&lines)).await.unwrap();
        assert!(report.confirmed_events.is_empty());
        assert_eq!(report.ambiguous_groups.len(), 1);

        let group = report.ambiguous_groups[0].clone();
        let bogus = store
            .resolve_ambiguous_group(group.clone(), ts(2025, 10, 1, 9, 0))
            .await;
        assert!(matches!(bogus, Err(StoreError::Validation(_))));

        let event = store
            .resolve_ambiguous_group(group, ts(2025, 10, 1, 11, 0))
            .await
            .unwrap();
        assert_eq!(event.confidence, Confidence::Low);
        assert_eq!(store.list_device_events().await.unwrap().sensor_changes.len(), 1);
    }

    #[tokio::test]
    async fn stats_read_without_rebuild() {
        let (_dir, store) = temp_store().await;
        store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 100)))
            .await
            .unwrap();

        let stats = store.get_master_dataset_stats().await.unwrap();
        assert_eq!(stats.total_count, 6);
        assert_eq!(
            stats.date_range.map(|range| range.min),
            Some(ts(2025, 10, 1, 8, 0))
        );
    }

    #[tokio::test]
    async fn stats_rebuild_settles_state() {
        let (_dir, store) = temp_store().await;
        store
            .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, 1, 8, 0), 6, 100)))
            .await
            .unwrap();
        store.invalidate_cache().await.unwrap();
        assert_eq!(store.state().await, DatasetState::Stale);

        let stats = store.get_master_dataset_stats().await.unwrap();
        assert_eq!(stats.total_count, 6);
        assert_eq!(store.state().await, DatasetState::Ready);

        store.invalidate_cache().await.unwrap();
        store.close().await;
        assert!(store.get_master_dataset_stats().await.is_err());
        assert_eq!(store.state().await, DatasetState::Stale);
    }

    #[tokio::test]
    async fn alert_seconds_do_not_widen_the_cluster() {
        let (_dir, store) = temp_store().await;
        let mut lines = glucose_series(ts(2025, 10, 1, 8, 0), 6, 110);
        lines.push(CsvLine::alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"));
        lines.push(CsvLine::alert(
            ts(2025, 10, 1, 9, 0) + chrono::Duration::seconds(30),
            "CHANGE SENSOR",
        ));

        let report = store.upload_csv(&carelink_csv(&lines)).await.unwrap();
        assert!(report.ambiguous_groups.is_empty());
        assert_eq!(report.confirmed_events.len(), 1);
        assert_eq!(report.confirmed_events[0].timestamp, ts(2025, 10, 1, 8, 0));
        assert_eq!(report.confirmed_events[0].confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn workdays_import_and_list() {
        let (_dir, store) = temp_store().await;
        let report = store
            .import_workdays(r#"["2025-10-01","2025-10-02"]"#, Some("protime".into()))
            .await
            .unwrap();
        assert_eq!(report.added, 2);

        let again = store
            .import_workdays(r#"["2025-10-02"]"#, None)
            .await
            .unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(store.list_workdays().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn operations_fail_after_close() {
        let (_dir, store) = temp_store().await;
        store.close().await;
        assert!(matches!(
            store.load_or_rebuild_cache().await,
            Err(StoreError::StorageWrite(_))
        ));
    }

    struct FixedProducer;

    impl RowProducer for FixedProducer {
        fn parse(&self, _raw: &str) -> Result<ParsedExport, ParseError> {
            Ok(ParsedExport {
                rows: vec![CsvRow {
                    timestamp: ts(2025, 10, 1, 8, 0),
                    glucose: Some(140),
                    alert: None,
                    rewind: false,
                }],
                ..Default::default()
            })
        }
    }

    struct FixedWorkdays;

    impl WorkdayParser for FixedWorkdays {
        fn parse_workdays(
            &self,
            _raw: &str,
            _fallback_year: i32,
        ) -> Result<BTreeSet<NaiveDate>, ParseError> {
            Ok(NaiveDate::from_ymd_opt(2025, 10, 6).into_iter().collect())
        }
    }

    #[tokio::test]
    async fn custom_producers_replace_the_defaults() {
        let (_dir, store) = temp_store().await;
        let store = store
            .with_row_producer(Arc::new(FixedProducer))
            .with_workday_parser(Arc::new(FixedWorkdays));

        let report = store.upload_csv("ignored").await.unwrap();
        assert_eq!(report.stats.total_count, 1);
        assert_eq!(report.exception_count, 0);

        let imported = store.import_workdays("ignored", None).await.unwrap();
        assert_eq!(imported.added, 1);
    }

    #[tokio::test]
    async fn import_history_is_newest_first_and_clearable() {
        let (_dir, store) = temp_store().await;
        for day in 1..=3 {
            store
                .upload_csv(&carelink_csv(&glucose_series(ts(2025, 10, day, 8, 0), 2, 100)))
                .await
                .unwrap();
        }

        let history = store.import_history().await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].timestamp >= history[2].timestamp);
        assert_eq!(history[0].record_count, 2);

        assert_eq!(store.clear_import_history().await.unwrap(), 3);
        assert!(store.import_history().await.unwrap().is_empty());
    }

    #[test]
    fn auto_names_use_dutch_months() {
        let range = DateRange {
            min: ts(2025, 9, 20, 0, 0),
            max: ts(2025, 10, 3, 0, 0),
        };
        assert_eq!(auto_name(Some(range)), "Sep-Okt 2025");
        assert_eq!(auto_name(None), "Unnamed Upload");
    }
}
