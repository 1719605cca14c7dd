//! Durable journal of in-flight note updates.
//!
//! # Responsibility
//! - Record every remove-then-recreate update while it is between
//!   "old present" and "old removed".
//! - Let a reconcile pass find updates stuck with two live artifacts.
//!
//! # Invariants
//! - A row exists only while its update is unfinished.
//! - A row at `new_created` always carries `new_location`.
//! - Journal connections have every schema version applied before use.

use crate::error::ErrorKind;
use crate::model::note::NoteId;
use crate::storage::replace::ReplacePhase;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

mod schema;

pub use schema::schema_version;

pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Debug)]
pub enum JournalError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    InvalidData(String),
    /// Another thread panicked while holding the journal connection.
    Poisoned,
}

impl JournalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlite(_) | Self::Io(_) | Self::Poisoned => ErrorKind::Io,
            Self::UnsupportedSchemaVersion { .. } | Self::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl Display for JournalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "journal schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidData(message) => write!(f, "invalid journal row: {message}"),
            Self::Poisoned => write!(f, "journal connection lock poisoned"),
        }
    }
}

impl Error for JournalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for JournalError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One unfinished update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub entry_id: i64,
    /// Scope of the store that owns the artifacts (see `ReplaceSteps::scope`).
    pub backend: String,
    pub note_id: NoteId,
    pub phase: ReplacePhase,
    pub old_location: String,
    pub new_location: Option<String>,
    /// Epoch milliseconds of the last phase change.
    pub updated_at: i64,
}

/// SQLite-backed update journal, shareable across threads.
pub struct UpdateJournal {
    conn: Mutex<Connection>,
}

impl UpdateJournal {
    /// Opens (or creates) a journal file and applies pending schema versions.
    ///
    /// # Side effects
    /// - Creates the parent directory when missing.
    /// - Emits `journal_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(JournalError::Io)?;
        }
        Self::bootstrap("file", || Connection::open(path))
    }

    /// Opens a private in-memory journal. Used by tests and dry runs.
    pub fn in_memory() -> JournalResult<Self> {
        Self::bootstrap("memory", Connection::open_in_memory)
    }

    fn bootstrap(
        mode: &str,
        open: impl FnOnce() -> rusqlite::Result<Connection>,
    ) -> JournalResult<Self> {
        let started_at = Instant::now();
        info!("event=journal_open module=journal status=start mode={mode}");

        let result = open()
            .map_err(JournalError::from)
            .and_then(|mut conn| {
                conn.busy_timeout(Duration::from_secs(5))?;
                schema::upgrade(&mut conn)?;
                Ok(conn)
            });

        match result {
            Ok(conn) => {
                info!(
                    "event=journal_open module=journal status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    conn: Mutex::new(conn),
                })
            }
            Err(err) => {
                error!(
                    "event=journal_open module=journal status=error mode={mode} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Opens an entry at `old_present` and returns its id.
    pub fn begin(&self, backend: &str, note_id: NoteId, old_location: &str) -> JournalResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO update_journal (backend, note_id, phase, old_location, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                backend,
                note_id.to_string(),
                ReplacePhase::OldPresent.as_str(),
                old_location,
                now_ms()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Moves an entry to `new_created`, recording where the new artifact lives.
    pub fn mark_created(&self, entry_id: i64, new_location: &str) -> JournalResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE update_journal
             SET phase = ?2, new_location = ?3, updated_at = ?4
             WHERE entry_id = ?1;",
            params![
                entry_id,
                ReplacePhase::NewCreated.as_str(),
                new_location,
                now_ms()
            ],
        )?;
        if changed == 0 {
            return Err(JournalError::InvalidData(format!(
                "journal entry {entry_id} does not exist"
            )));
        }
        Ok(())
    }

    /// Closes an entry: the update finished or was abandoned before creating
    /// anything.
    pub fn finish(&self, entry_id: i64) -> JournalResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM update_journal WHERE entry_id = ?1;",
            [entry_id],
        )?;
        Ok(())
    }

    /// Lists unfinished entries for one backend scope, oldest first.
    pub fn open_entries(&self, backend: &str) -> JournalResult<Vec<JournalEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entry_id, backend, note_id, phase, old_location, new_location, updated_at
             FROM update_journal
             WHERE backend = ?1
             ORDER BY entry_id ASC;",
        )?;
        let mut rows = stmt.query([backend])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let note_text: String = row.get("note_id")?;
            let phase_text: String = row.get("phase")?;
            entries.push(JournalEntry {
                entry_id: row.get("entry_id")?,
                backend: row.get("backend")?,
                note_id: Uuid::parse_str(&note_text).map_err(|_| {
                    JournalError::InvalidData(format!("invalid note id `{note_text}`"))
                })?,
                phase: ReplacePhase::parse(&phase_text).ok_or_else(|| {
                    JournalError::InvalidData(format!("invalid phase `{phase_text}`"))
                })?,
                old_location: row.get("old_location")?,
                new_location: row.get("new_location")?,
                updated_at: row.get("updated_at")?,
            });
        }
        Ok(entries)
    }

    fn lock(&self) -> JournalResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| JournalError::Poisoned)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::{schema_version, UpdateJournal};
    use crate::storage::replace::ReplacePhase;
    use uuid::Uuid;

    #[test]
    fn entry_moves_through_phases_and_disappears_on_finish() {
        let journal = UpdateJournal::in_memory().expect("journal should open");
        let note_id = Uuid::new_v4();

        let entry_id = journal
            .begin("fs:/notes", note_id, "inbox/old.md")
            .expect("begin should succeed");
        let open = journal.open_entries("fs:/notes").expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].phase, ReplacePhase::OldPresent);
        assert_eq!(open[0].new_location, None);

        journal
            .mark_created(entry_id, "work/new.md")
            .expect("mark should succeed");
        let open = journal.open_entries("fs:/notes").expect("list");
        assert_eq!(open[0].phase, ReplacePhase::NewCreated);
        assert_eq!(open[0].new_location.as_deref(), Some("work/new.md"));
        assert_eq!(open[0].note_id, note_id);

        journal.finish(entry_id).expect("finish should succeed");
        assert!(journal.open_entries("fs:/notes").expect("list").is_empty());
    }

    #[test]
    fn entries_are_scoped_per_backend() {
        let journal = UpdateJournal::in_memory().expect("journal should open");
        journal
            .begin("fs:/a", Uuid::new_v4(), "x.md")
            .expect("begin");
        assert!(journal.open_entries("fs:/b").expect("list").is_empty());
    }

    #[test]
    fn mark_created_on_unknown_entry_fails() {
        let journal = UpdateJournal::in_memory().expect("journal should open");
        assert!(journal.mark_created(42, "nowhere").is_err());
    }

    #[test]
    fn file_journal_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("journal.sqlite3");
        let note_id = Uuid::new_v4();
        {
            let journal = UpdateJournal::open(&path).expect("open");
            let entry = journal.begin("remote:root", note_id, "doc-1").expect("begin");
            journal.mark_created(entry, "doc-2").expect("mark");
        }

        let reopened = UpdateJournal::open(&path).expect("reopen");
        let open = reopened.open_entries("remote:root").expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].note_id, note_id);
        assert!(schema_version() >= 1);
    }
}
