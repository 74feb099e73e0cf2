use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::connection::Database;

pub const ACTIVE_UPLOAD_KEY: &str = "active_upload_id";
pub const UPLOAD_SEQ_KEY: &str = "upload_seq";
pub const LEGACY_MIGRATION_KEY: &str = "legacy_migration";

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
    Ok(())
}

pub fn active_upload_id(conn: &Connection) -> Result<Option<String>> {
    get_setting(conn, ACTIVE_UPLOAD_KEY)
}

pub fn set_active_upload(conn: &Connection, upload_id: &str) -> Result<()> {
    set_setting(conn, ACTIVE_UPLOAD_KEY, upload_id)
}

/// Clear the active pointer, but only if it still points at `upload_id`.
pub fn clear_active_upload_if(conn: &Connection, upload_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM settings WHERE key = ?1 AND value = ?2",
        params![ACTIVE_UPLOAD_KEY, upload_id],
    )?;
    Ok(())
}

impl Database {
    pub async fn get_active_upload_id(&self) -> Result<Option<String>> {
        self.execute(|conn| active_upload_id(conn)).await
    }
}
