use anyhow::Result;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_strategy, to_i64, to_usize},
    models::ImportHistoryEntry,
};

fn row_to_entry(row: &Row) -> Result<ImportHistoryEntry> {
    let imported_at: String = row.get("imported_at")?;
    let strategy: String = row.get("strategy")?;
    let record_count: i64 = row.get("record_count")?;
    let duration_ms: i64 = row.get("duration_ms")?;
    let exception_count: i64 = row.get("exception_count")?;

    Ok(ImportHistoryEntry {
        id: row.get("id")?,
        filename: row.get("filename")?,
        record_count: to_usize(record_count, "record_count")?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        strategy: parse_strategy(&strategy)?,
        exception_count: to_usize(exception_count, "exception_count")?,
        timestamp: parse_datetime(&imported_at, "imported_at")?,
    })
}

/// Push an entry to the front of the ring buffer and drop everything beyond
/// `capacity`.
pub fn append_entry(conn: &Connection, entry: &ImportHistoryEntry, capacity: usize) -> Result<()> {
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM import_history",
        [],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO import_history (id, seq, filename, record_count, duration_ms, strategy, exception_count, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id,
            next_seq,
            entry.filename,
            to_i64(entry.record_count)?,
            i64::try_from(entry.duration_ms).unwrap_or(i64::MAX),
            entry.strategy.as_str(),
            to_i64(entry.exception_count)?,
            entry.timestamp.to_rfc3339(),
        ],
    )?;

    conn.execute(
        "DELETE FROM import_history
         WHERE id NOT IN (SELECT id FROM import_history ORDER BY seq DESC LIMIT ?1)",
        params![to_i64(capacity)?],
    )?;

    Ok(())
}

/// Newest first.
pub fn list_entries(conn: &Connection) -> Result<Vec<ImportHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, filename, record_count, duration_ms, strategy, exception_count, imported_at
         FROM import_history
         ORDER BY seq DESC",
    )?;
    let mut rows = stmt.query([])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(row_to_entry(row)?);
    }
    Ok(entries)
}

pub fn clear_entries(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM import_history", [])?)
}

impl Database {
    pub async fn get_import_history(&self) -> Result<Vec<ImportHistoryEntry>> {
        self.execute(|conn| list_entries(conn)).await
    }

    pub async fn clear_import_history(&self) -> Result<usize> {
        self.execute(|conn| clear_entries(conn)).await
    }
}
