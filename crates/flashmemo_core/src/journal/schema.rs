//! Journal schema versions.
//!
//! Each version runs in its own transaction and bumps `PRAGMA user_version`
//! inside it, so an interrupted upgrade resumes from the last committed
//! version.

use super::{JournalError, JournalResult};
use log::info;
use rusqlite::Connection;

/// Ordered `(version, sql)` pairs. Versions must stay strictly increasing.
const SCHEMA_STEPS: &[(u32, &str)] = &[(1, include_str!("0001_update_journal.sql"))];

/// Newest schema version this binary can write.
pub fn schema_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |(version, _)| *version)
}

/// Brings `conn` up to `schema_version()`.
pub(crate) fn upgrade(conn: &mut Connection) -> JournalResult<()> {
    let on_disk: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let target = schema_version();
    if on_disk > target {
        return Err(JournalError::UnsupportedSchemaVersion {
            db_version: on_disk,
            latest_supported: target,
        });
    }

    for (version, sql) in SCHEMA_STEPS.iter().filter(|(version, _)| *version > on_disk) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!("event=journal_migrate module=journal status=ok version={version}");
    }
    Ok(())
}
