use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::log_info;

const ENABLE_LOGS: bool = true;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

/// Ordered schema steps. `user_version` records the last one applied.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "uploads, cache, events, history and settings",
        sql: include_str!("schemas/schema_v1.sql"),
    },
    Migration {
        version: 2,
        name: "tombstones and workdays",
        sql: include_str!("schemas/schema_v2.sql"),
    },
];

fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |step| step.version)
}

/// Bring the schema up to date in one transaction. A database written by a
/// newer build is refused rather than downgraded.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let latest = latest_version();

    if current > latest {
        bail!("database schema v{current} is newer than this build supports (v{latest})");
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|step| step.version > current)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for step in &pending {
        tx.execute_batch(step.sql)
            .with_context(|| format!("schema v{} ({}) failed", step.version, step.name))?;
        log_info!("Applied schema v{}: {}", step.version, step.name);
    }
    tx.pragma_update(None, "user_version", latest)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}
