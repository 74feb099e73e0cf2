use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_confidence, parse_datetime, parse_event_kind},
    models::{DateRange, DeviceEvent, DeviceEventKind, DeviceEvents},
    repositories::tombstones::{
        clear_event_tombstones, insert_event_tombstone, is_event_tombstoned,
    },
};

fn row_to_event(row: &Row) -> Result<DeviceEvent> {
    let kind: String = row.get("kind")?;
    let timestamp: String = row.get("timestamp")?;
    let confidence: String = row.get("confidence")?;
    let alerts_json: String = row.get("source_alerts_json")?;

    Ok(DeviceEvent {
        kind: parse_event_kind(&kind)?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        confidence: parse_confidence(&confidence)?,
        source_alert_texts: serde_json::from_str(&alerts_json)
            .context("corrupt source_alerts_json")?,
        cluster_span_minutes: row.get("cluster_span_minutes")?,
    })
}

/// Store confirmed events. Events already present or tombstoned are skipped;
/// returns the events that were actually inserted.
pub fn insert_confirmed(
    conn: &Connection,
    events: &[DeviceEvent],
    upload_id: Option<&str>,
) -> Result<Vec<DeviceEvent>> {
    let now = Utc::now().to_rfc3339();
    let mut inserted = Vec::new();

    for event in events {
        if is_event_tombstoned(conn, event.kind, event.timestamp)? {
            continue;
        }

        let alerts_json = serde_json::to_string(&event.source_alert_texts)
            .context("failed to serialize source alerts")?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO device_events (
                kind, timestamp, confidence, source_alerts_json, cluster_span_minutes, upload_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.kind.as_str(),
                event.timestamp.to_rfc3339(),
                event.confidence.as_str(),
                alerts_json,
                event.cluster_span_minutes,
                upload_id,
                now,
            ],
        )?;

        if affected > 0 {
            inserted.push(event.clone());
        }
    }

    Ok(inserted)
}

/// All confirmed events, oldest first.
pub fn load_all(conn: &Connection) -> Result<Vec<DeviceEvent>> {
    let mut stmt = conn.prepare(
        "SELECT kind, timestamp, confidence, source_alerts_json, cluster_span_minutes
         FROM device_events
         ORDER BY timestamp ASC, kind ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(row_to_event(row)?);
    }
    Ok(events)
}

pub fn load_grouped(conn: &Connection) -> Result<DeviceEvents> {
    Ok(DeviceEvents::from_events(load_all(conn)?))
}

/// Delete one event and tombstone it so a re-upload cannot bring it back.
pub fn delete_event(
    conn: &Connection,
    kind: DeviceEventKind,
    timestamp: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM device_events WHERE kind = ?1 AND timestamp = ?2",
        params![kind.as_str(), timestamp.to_rfc3339()],
    )?;
    if affected > 0 {
        insert_event_tombstone(conn, kind, timestamp)?;
    }
    Ok(affected > 0)
}

pub fn delete_in_range(conn: &Connection, range: DateRange) -> Result<usize> {
    let doomed: Vec<DeviceEvent> = load_all(conn)?
        .into_iter()
        .filter(|event| range.contains(event.timestamp))
        .collect();

    for event in &doomed {
        delete_event(conn, event.kind, event.timestamp)?;
    }
    Ok(doomed.len())
}

/// Full reset: removes every event and forgets earlier deletions.
pub fn delete_all(conn: &Connection) -> Result<usize> {
    let affected = conn.execute("DELETE FROM device_events", [])?;
    clear_event_tombstones(conn)?;
    Ok(affected)
}

impl Database {
    pub async fn list_device_events(&self) -> Result<DeviceEvents> {
        self.execute(|conn| load_grouped(conn)).await
    }
}
