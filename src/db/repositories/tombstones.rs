use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    helpers::{parse_datetime, parse_event_kind},
    models::{DateRange, DeviceEventKind, EventTombstone, ReadingTombstone},
};

pub fn insert_reading_tombstone(
    conn: &Connection,
    range: DateRange,
    applies_before_seq: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO reading_tombstones (range_start, range_end, applies_before_seq, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            range.min.to_rfc3339(),
            range.max.to_rfc3339(),
            applies_before_seq,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn load_reading_tombstones(conn: &Connection) -> Result<Vec<ReadingTombstone>> {
    let mut stmt = conn.prepare(
        "SELECT id, range_start, range_end, applies_before_seq, created_at
         FROM reading_tombstones
         ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut tombstones = Vec::new();
    while let Some(row) = rows.next()? {
        let start: String = row.get(1)?;
        let end: String = row.get(2)?;
        let created_at: String = row.get(4)?;
        tombstones.push(ReadingTombstone {
            id: row.get(0)?,
            range: DateRange {
                min: parse_datetime(&start, "range_start")?,
                max: parse_datetime(&end, "range_end")?,
            },
            applies_before_seq: row.get(3)?,
            created_at: parse_datetime(&created_at, "created_at")?,
        });
    }
    Ok(tombstones)
}

pub fn clear_reading_tombstones(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM reading_tombstones", [])?;
    Ok(())
}

pub fn insert_event_tombstone(
    conn: &Connection,
    kind: DeviceEventKind,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO event_tombstones (kind, timestamp, deleted_at)
         VALUES (?1, ?2, ?3)",
        params![kind.as_str(), timestamp.to_rfc3339(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn is_event_tombstoned(
    conn: &Connection,
    kind: DeviceEventKind,
    timestamp: DateTime<Utc>,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM event_tombstones WHERE kind = ?1 AND timestamp = ?2",
            params![kind.as_str(), timestamp.to_rfc3339()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn remove_event_tombstone(
    conn: &Connection,
    kind: DeviceEventKind,
    timestamp: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM event_tombstones WHERE kind = ?1 AND timestamp = ?2",
        params![kind.as_str(), timestamp.to_rfc3339()],
    )?;
    Ok(affected > 0)
}

pub fn load_event_tombstones(conn: &Connection) -> Result<Vec<EventTombstone>> {
    let mut stmt = conn.prepare(
        "SELECT kind, timestamp, deleted_at FROM event_tombstones ORDER BY timestamp ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut tombstones = Vec::new();
    while let Some(row) = rows.next()? {
        let kind: String = row.get(0)?;
        let timestamp: String = row.get(1)?;
        let deleted_at: String = row.get(2)?;
        tombstones.push(EventTombstone {
            kind: parse_event_kind(&kind)?,
            timestamp: parse_datetime(&timestamp, "timestamp")?,
            deleted_at: parse_datetime(&deleted_at, "deleted_at")?,
        });
    }
    Ok(tombstones)
}

pub fn clear_event_tombstones(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM event_tombstones", [])?;
    Ok(())
}
