//! Persisted canonical reading cache. A single row; treated as a derived
//! cache, never as the source of truth.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{parse_date_range, to_i64, to_usize},
    models::{DatasetStats, Reading},
};

/// Bumped whenever the serialized reading layout changes; older blobs are
/// treated as stale and rebuilt.
pub const CACHE_FORMAT_VERSION: i64 = 1;

/// Readings from the cache, or `None` when it is missing, stale or written by
/// another format version.
pub fn load_valid_readings(conn: &Connection) -> Result<Option<Vec<Reading>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT readings_json FROM master_cache
             WHERE id = 1 AND is_stale = 0 AND version = ?1",
            params![CACHE_FORMAT_VERSION],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|json| serde_json::from_str(&json).context("corrupt master cache blob"))
        .transpose()
}

/// Stats columns of a valid cache without decoding the reading blob.
pub fn load_valid_stats(conn: &Connection) -> Result<Option<DatasetStats>> {
    let row: Option<(i64, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT total_count, date_min, date_max FROM master_cache
             WHERE id = 1 AND is_stale = 0 AND version = ?1",
            params![CACHE_FORMAT_VERSION],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    match row {
        Some((total, min, max)) => Ok(Some(DatasetStats {
            date_range: parse_date_range(min, max)?,
            total_count: to_usize(total, "total_count")?,
        })),
        None => Ok(None),
    }
}

pub fn save_cache(conn: &Connection, readings: &[Reading]) -> Result<DatasetStats> {
    let stats = DatasetStats::from_sorted(readings);
    let json = serde_json::to_string(readings).context("failed to serialize master cache")?;

    conn.execute(
        "INSERT INTO master_cache (id, version, is_stale, readings_json, total_count, date_min, date_max, updated_at)
         VALUES (1, ?1, 0, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             version = excluded.version,
             is_stale = 0,
             readings_json = excluded.readings_json,
             total_count = excluded.total_count,
             date_min = excluded.date_min,
             date_max = excluded.date_max,
             updated_at = excluded.updated_at",
        params![
            CACHE_FORMAT_VERSION,
            json,
            to_i64(stats.total_count)?,
            stats.date_range.map(|range| range.min.to_rfc3339()),
            stats.date_range.map(|range| range.max.to_rfc3339()),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("failed to write master cache")?;

    Ok(stats)
}

pub fn mark_stale(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE master_cache SET is_stale = 1 WHERE id = 1", [])?;
    Ok(())
}

pub fn clear_cache(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM master_cache", [])?;
    Ok(())
}

/// Raw serialized blob, regardless of staleness.
pub fn cache_blob(conn: &Connection) -> Result<Option<String>> {
    let raw = conn
        .query_row(
            "SELECT readings_json FROM master_cache WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw)
}

impl Database {
    pub async fn master_cache_blob(&self) -> Result<Option<String>> {
        self.execute(|conn| cache_blob(conn)).await
    }
}
