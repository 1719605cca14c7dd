//! Remove-then-recreate update state machine.
//!
//! # Responsibility
//! - Drive one update through `OldPresent -> NewCreated -> OldRemoved`.
//! - Journal each phase change so `reconcile` can finish stuck updates.
//!
//! # Invariants
//! - The new artifact is written before the old one is touched, so every
//!   failure leaves at least one complete artifact for the note.
//! - A failed removal never rolls the new artifact back; the caller gets a
//!   `PartialUpdateWarning` naming both locations instead.

use super::{PartialUpdateWarning, StorageError, StorageResult};
use crate::journal::UpdateJournal;
use crate::model::note::{Note, NoteId};
use log::{info, warn};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Progress of one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePhase {
    /// Only the old artifact exists.
    OldPresent,
    /// Both artifacts exist; the new one is authoritative.
    NewCreated,
    /// Only the new artifact exists.
    OldRemoved,
}

impl ReplacePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OldPresent => "old_present",
            Self::NewCreated => "new_created",
            Self::OldRemoved => "old_removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "old_present" => Some(Self::OldPresent),
            "new_created" => Some(Self::NewCreated),
            "old_removed" => Some(Self::OldRemoved),
            _ => None,
        }
    }
}

impl Display for ReplacePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend primitives the update state machine is built from.
///
/// Locations are backend-defined strings: a root-relative path for the
/// filesystem store, a document token for the remote store.
pub trait ReplaceSteps {
    /// Key scoping this store's journal rows.
    fn scope(&self) -> String;
    /// Finds the authoritative artifact currently holding `note_id`.
    fn locate(&self, note_id: NoteId) -> StorageResult<String>;
    /// Writes `note` as a complete new artifact and returns its location.
    ///
    /// Returns `previous` unchanged when the artifact was rewritten in place.
    fn create_replacement(&self, note: &Note, previous: &str) -> StorageResult<String>;
    /// Deletes one artifact. Deleting an absent artifact succeeds.
    fn remove(&self, location: &str) -> StorageResult<()>;
}

/// Replaces the stored note carrying `note.id` with `note`.
///
/// # Errors
/// - `Validation` before any I/O when `note` breaks note invariants.
/// - `NotFound` when no artifact carries `note.id`.
/// - Any creation error, with the old artifact left untouched.
/// - `PartialUpdate` when the new artifact exists but the old one could not
///   be removed. The journal entry stays open for `reconcile`.
pub fn replace_note<S>(
    steps: &S,
    journal: Option<&UpdateJournal>,
    note: &Note,
) -> StorageResult<NoteId>
where
    S: ReplaceSteps + ?Sized,
{
    note.validate()?;
    let started_at = Instant::now();
    let scope = steps.scope();

    let old_location = steps.locate(note.id)?;
    let entry_id = match journal {
        Some(journal) => Some(journal.begin(&scope, note.id, &old_location)?),
        None => None,
    };

    let new_location = match steps.create_replacement(note, &old_location) {
        Ok(location) => location,
        Err(err) => {
            close_entry(journal, entry_id);
            warn!(
                "event=note_update module=storage status=error phase={} scope={} duration_ms={} error_kind={}",
                ReplacePhase::OldPresent,
                scope,
                started_at.elapsed().as_millis(),
                err.kind()
            );
            return Err(err);
        }
    };

    if let (Some(journal), Some(entry_id)) = (journal, entry_id) {
        if let Err(err) = journal.mark_created(entry_id, &new_location) {
            warn!(
                "event=journal_write module=storage status=error phase={} error={}",
                ReplacePhase::NewCreated,
                err
            );
        }
    }

    if new_location != old_location {
        if let Err(err) = steps.remove(&old_location) {
            warn!(
                "event=note_update module=storage status=partial phase={} scope={} duration_ms={} error_kind={}",
                ReplacePhase::NewCreated,
                scope,
                started_at.elapsed().as_millis(),
                err.kind()
            );
            return Err(StorageError::PartialUpdate(PartialUpdateWarning {
                note_id: note.id,
                new_location,
                stale_location: old_location,
                cause: err.to_string(),
            }));
        }
    }

    close_entry(journal, entry_id);
    info!(
        "event=note_update module=storage status=ok phase={} scope={} in_place={} duration_ms={}",
        ReplacePhase::OldRemoved,
        scope,
        new_location == old_location,
        started_at.elapsed().as_millis()
    );
    Ok(note.id)
}

fn close_entry(journal: Option<&UpdateJournal>, entry_id: Option<i64>) {
    if let (Some(journal), Some(entry_id)) = (journal, entry_id) {
        if let Err(err) = journal.finish(entry_id) {
            warn!("event=journal_write module=storage status=error phase=finish error={err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{replace_note, ReplacePhase, ReplaceSteps};
    use crate::journal::UpdateJournal;
    use crate::model::note::{Note, NoteId};
    use crate::storage::{StorageError, StorageResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Keeps artifacts in a map keyed by `<tag>/<title>`.
    #[derive(Default)]
    struct MemorySteps {
        artifacts: Mutex<HashMap<String, Note>>,
        fail_create: bool,
        fail_remove: bool,
    }

    impl MemorySteps {
        fn with(note: &Note) -> Self {
            let steps = Self::default();
            steps
                .artifacts
                .lock()
                .unwrap()
                .insert(location_of(note), note.clone());
            steps
        }

        fn locations(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.artifacts.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    fn location_of(note: &Note) -> String {
        format!("{}/{}", note.tags[0], note.title)
    }

    impl ReplaceSteps for MemorySteps {
        fn scope(&self) -> String {
            "memory".to_string()
        }

        fn locate(&self, note_id: NoteId) -> StorageResult<String> {
            self.artifacts
                .lock()
                .unwrap()
                .iter()
                .find(|(_, note)| note.id == note_id)
                .map(|(location, _)| location.clone())
                .ok_or_else(|| StorageError::not_found(None, note_id.to_string()))
        }

        fn create_replacement(&self, note: &Note, _previous: &str) -> StorageResult<String> {
            if self.fail_create {
                return Err(StorageError::io(
                    "create",
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ));
            }
            let location = location_of(note);
            self.artifacts
                .lock()
                .unwrap()
                .insert(location.clone(), note.clone());
            Ok(location)
        }

        fn remove(&self, location: &str) -> StorageResult<()> {
            if self.fail_remove {
                return Err(StorageError::io(
                    "remove",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
                ));
            }
            self.artifacts.lock().unwrap().remove(location);
            Ok(())
        }
    }

    fn sample() -> Note {
        Note::new("Buy milk", "buy milk", vec!["inbox".to_string()])
    }

    #[test]
    fn retag_creates_new_artifact_and_removes_old() {
        let note = sample();
        let steps = MemorySteps::with(&note);
        let journal = UpdateJournal::in_memory().unwrap();

        let mut moved = note.clone();
        moved.tags = vec!["errands".to_string()];
        let id = replace_note(&steps, Some(&journal), &moved).unwrap();

        assert_eq!(id, note.id);
        assert_eq!(steps.locations(), vec!["errands/Buy milk".to_string()]);
        assert!(journal.open_entries("memory").unwrap().is_empty());
    }

    #[test]
    fn failed_removal_reports_partial_update_and_keeps_journal_entry() {
        let note = sample();
        let mut steps = MemorySteps::with(&note);
        steps.fail_remove = true;
        let journal = UpdateJournal::in_memory().unwrap();

        let mut moved = note.clone();
        moved.tags = vec!["errands".to_string()];
        let err = replace_note(&steps, Some(&journal), &moved).unwrap_err();

        match err {
            StorageError::PartialUpdate(warning) => {
                assert_eq!(warning.note_id, note.id);
                assert_eq!(warning.new_location, "errands/Buy milk");
                assert_eq!(warning.stale_location, "inbox/Buy milk");
            }
            other => panic!("expected partial update, got {other:?}"),
        }
        assert_eq!(steps.locations().len(), 2);

        let open = journal.open_entries("memory").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].phase, ReplacePhase::NewCreated);
        assert_eq!(open[0].new_location.as_deref(), Some("errands/Buy milk"));
    }

    #[test]
    fn failed_creation_leaves_old_artifact_untouched() {
        let note = sample();
        let mut steps = MemorySteps::with(&note);
        steps.fail_create = true;
        let journal = UpdateJournal::in_memory().unwrap();

        let mut moved = note.clone();
        moved.content = "oat milk".to_string();
        moved.tags = vec!["errands".to_string()];
        assert!(replace_note(&steps, Some(&journal), &moved).is_err());

        assert_eq!(steps.locations(), vec!["inbox/Buy milk".to_string()]);
        assert!(journal.open_entries("memory").unwrap().is_empty());
    }

    #[test]
    fn in_place_rewrite_skips_removal() {
        let note = sample();
        let mut steps = MemorySteps::with(&note);
        steps.fail_remove = true;

        let mut edited = note.clone();
        edited.content = "buy oat milk".to_string();
        replace_note(&steps, None, &edited).unwrap();

        let stored = steps.artifacts.lock().unwrap()["inbox/Buy milk"].clone();
        assert_eq!(stored.content, "buy oat milk");
    }

    #[test]
    fn invalid_note_is_rejected_before_lookup() {
        let steps = MemorySteps::default();
        let mut note = sample();
        note.content = " ".to_string();
        let err = replace_note(&steps, None, &note).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn phase_labels_round_trip() {
        for phase in [
            ReplacePhase::OldPresent,
            ReplacePhase::NewCreated,
            ReplacePhase::OldRemoved,
        ] {
            assert_eq!(ReplacePhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(ReplacePhase::parse("done"), None);
    }
}
