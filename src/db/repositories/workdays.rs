use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};

use crate::db::{connection::Database, helpers::parse_date};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Insert work-schedule days; returns how many were new.
pub fn insert_workdays(
    conn: &Connection,
    days: &BTreeSet<NaiveDate>,
    source: Option<&str>,
) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let mut added = 0;
    for day in days {
        added += conn.execute(
            "INSERT OR IGNORE INTO workdays (date, source, created_at) VALUES (?1, ?2, ?3)",
            params![day.format(DATE_FORMAT).to_string(), source, now],
        )?;
    }
    Ok(added)
}

pub fn list_workdays(conn: &Connection) -> Result<BTreeSet<NaiveDate>> {
    let mut stmt = conn.prepare("SELECT date FROM workdays ORDER BY date ASC")?;
    let mut rows = stmt.query([])?;
    let mut days = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        days.insert(parse_date(&raw, "date")?);
    }
    Ok(days)
}

pub fn delete_all_workdays(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM workdays", [])?)
}

/// Inclusive on both ends.
pub fn delete_workdays_between(conn: &Connection, start: NaiveDate, end: NaiveDate) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM workdays WHERE date >= ?1 AND date <= ?2",
        params![
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string()
        ],
    )?)
}

impl Database {
    pub async fn list_workdays(&self) -> Result<BTreeSet<NaiveDate>> {
        self.execute(|conn| list_workdays(conn)).await
    }
}
