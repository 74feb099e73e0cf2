use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_date_range, parse_datetime, parse_strategy, to_i64, to_usize},
    models::{ImportStrategy, UploadPayload, UploadRecord},
    repositories::settings::{get_setting, set_setting, UPLOAD_SEQ_KEY},
};

const UPLOAD_COLUMNS: &str = "id, seq, name, filename, uploaded_at, locked, strategy, superseded,
     date_min, date_max, reading_count";

fn row_to_upload(row: &Row) -> Result<UploadRecord> {
    let uploaded_at: String = row.get("uploaded_at")?;
    let strategy: String = row.get("strategy")?;
    let date_min: Option<String> = row.get("date_min")?;
    let date_max: Option<String> = row.get("date_max")?;
    let reading_count: i64 = row.get("reading_count")?;

    Ok(UploadRecord {
        id: row.get("id")?,
        seq: row.get("seq")?,
        timestamp: parse_datetime(&uploaded_at, "uploaded_at")?,
        name: row.get("name")?,
        filename: row.get("filename")?,
        locked: row.get("locked")?,
        strategy: parse_strategy(&strategy)?,
        superseded: row.get("superseded")?,
        date_range: parse_date_range(date_min, date_max)?,
        reading_count: to_usize(reading_count, "reading_count")?,
    })
}

/// Sequence number of the most recently assigned upload (0 when none).
pub fn last_upload_seq(conn: &Connection) -> Result<i64> {
    match get_setting(conn, UPLOAD_SEQ_KEY)? {
        Some(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("invalid upload sequence '{raw}'")),
        None => Ok(0),
    }
}

/// Reserve the next replay sequence. Sequences are never reused, even after
/// the upload that held one is deleted.
pub fn next_upload_seq(conn: &Connection) -> Result<i64> {
    let next = last_upload_seq(conn)? + 1;
    set_setting(conn, UPLOAD_SEQ_KEY, &next.to_string())?;
    Ok(next)
}

pub fn insert_upload(conn: &Connection, record: &UploadRecord, payload: &UploadPayload) -> Result<()> {
    let payload_json =
        serde_json::to_string(payload).context("failed to serialize upload payload")?;

    conn.execute(
        "INSERT INTO uploads (
            id, seq, name, filename, uploaded_at, locked, strategy, superseded,
            date_min, date_max, reading_count, payload_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.id,
            record.seq,
            record.name,
            record.filename,
            record.timestamp.to_rfc3339(),
            record.locked,
            record.strategy.as_str(),
            record.superseded,
            record.date_range.map(|range| range.min.to_rfc3339()),
            record.date_range.map(|range| range.max.to_rfc3339()),
            to_i64(record.reading_count)?,
            payload_json,
        ],
    )
    .with_context(|| format!("failed to insert upload {}", record.id))?;
    Ok(())
}

pub fn get_upload(conn: &Connection, upload_id: &str) -> Result<Option<UploadRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![upload_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_upload(row)?)),
        None => Ok(None),
    }
}

pub fn upload_exists(conn: &Connection, upload_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM uploads WHERE id = ?1",
            params![upload_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn load_payload(conn: &Connection, upload_id: &str) -> Result<Option<UploadPayload>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM uploads WHERE id = ?1",
            params![upload_id],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|json| {
        serde_json::from_str(&json)
            .with_context(|| format!("corrupt payload for upload {upload_id}"))
    })
    .transpose()
}

/// All uploads in replay order.
pub fn list_uploads(conn: &Connection) -> Result<Vec<UploadRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UPLOAD_COLUMNS} FROM uploads ORDER BY seq ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut uploads = Vec::new();
    while let Some(row) = rows.next()? {
        uploads.push(row_to_upload(row)?);
    }
    Ok(uploads)
}

/// Payloads of every non-superseded upload, ordered by `seq`.
/// One live upload as it is fed back into a cache rebuild.
#[derive(Debug, Clone)]
pub struct ReplayUpload {
    pub seq: i64,
    pub uploaded_at: DateTime<Utc>,
    pub strategy: ImportStrategy,
    pub payload: UploadPayload,
}

/// Non-superseded uploads ordered by upload time, `seq` breaking ties.
/// Migrated uploads get a fresh `seq` but keep their original time, so
/// insertion order alone would let old data override newer uploads.
pub fn load_replay_set(conn: &Connection) -> Result<Vec<ReplayUpload>> {
    let mut stmt = conn.prepare(
        "SELECT id, seq, uploaded_at, strategy, payload_json FROM uploads
         WHERE superseded = 0",
    )?;
    let mut rows = stmt.query([])?;
    let mut replay = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let uploaded_at: String = row.get(2)?;
        let strategy: String = row.get(3)?;
        let json: String = row.get(4)?;
        let payload: UploadPayload = serde_json::from_str(&json)
            .with_context(|| format!("corrupt payload for upload {id}"))?;
        replay.push(ReplayUpload {
            seq: row.get(1)?,
            uploaded_at: parse_datetime(&uploaded_at, "uploaded_at")?,
            strategy: parse_strategy(&strategy)?,
            payload,
        });
    }
    replay.sort_by_key(|upload| (upload.uploaded_at, upload.seq));
    Ok(replay)
}

pub fn mark_superseded_before(conn: &Connection, seq: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE uploads SET superseded = 1 WHERE seq < ?1 AND superseded = 0",
        params![seq],
    )?;
    Ok(affected)
}

pub fn set_locked(conn: &Connection, upload_id: &str, locked: bool) -> Result<()> {
    let affected = conn.execute(
        "UPDATE uploads SET locked = ?1 WHERE id = ?2",
        params![locked, upload_id],
    )?;
    if affected == 0 {
        return Err(anyhow!("Upload not found"));
    }
    Ok(())
}

pub fn rename_upload(conn: &Connection, upload_id: &str, name: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE uploads SET name = ?1 WHERE id = ?2",
        params![name, upload_id],
    )?;
    if affected == 0 {
        return Err(anyhow!("Upload not found"));
    }
    Ok(())
}

pub fn delete_upload(conn: &Connection, upload_id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM uploads WHERE id = ?1", params![upload_id])?;
    Ok(affected > 0)
}

pub fn delete_all_uploads(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM uploads", [])?)
}

impl Database {
    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>> {
        self.execute(|conn| list_uploads(conn)).await
    }

    pub async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        let upload_id = upload_id.to_string();
        self.execute(move |conn| get_upload(conn, &upload_id)).await
    }
}
