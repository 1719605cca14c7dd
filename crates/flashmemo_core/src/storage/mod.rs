//! Storage backends and their consistency model.
//!
//! # Responsibility
//! - Define the capability set every backend offers
//!   (`save`, `load`, `list_files`, `update`, plus `list_tags`, `reconcile`).
//! - Own all note I/O and the update consistency policy.
//!
//! # Invariants
//! - A note is either absent or fully present with a locatable artifact.
//! - `update` is create-new-then-remove-old, driven by `replace::replace_note`.
//! - `list_files` reads headers only; its cost never depends on body size.
//! - When two artifacts claim one id, the most recently modified wins
//!   (ties: lexicographically greater location).
//! - A note is listed under its primary tag and under every secondary tag
//!   in its header; summaries always name the grouping it is stored in.

use crate::codec::CodecError;
use crate::error::ErrorKind;
use crate::journal::JournalError;
use crate::model::note::{FileSummary, Note, NoteId, NoteValidationError};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod fs;
pub mod remote;
pub mod replace;

pub use fs::FsNoteStore;
pub use remote::RemoteDocStore;
pub use replace::{replace_note, ReplacePhase, ReplaceSteps};

/// Longest artifact name derived from a title or tag.
pub const MAX_NAME_CHARS: usize = 60;

static UNSAFE_NAME_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("valid file name regex"));

pub type StorageResult<T> = Result<T, StorageError>;

/// Non-fatal outcome of an update that left the old artifact behind.
///
/// The new artifact is authoritative. The stale one stays until a
/// `reconcile` pass (or a manual cleanup) removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialUpdateWarning {
    pub note_id: NoteId,
    pub new_location: String,
    pub stale_location: String,
    /// Why removing the stale artifact failed.
    pub cause: String,
}

impl Display for PartialUpdateWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "note {} updated at `{}` but stale artifact `{}` remains: {}",
            self.note_id, self.new_location, self.stale_location, self.cause
        )
    }
}

impl Error for PartialUpdateWarning {}

/// Storage-layer error shared by all backends.
#[derive(Debug)]
pub enum StorageError {
    Validation(NoteValidationError),
    /// Another note already occupies the resolved name in this tag.
    Conflict { tag: String, name: String },
    /// `tag` is `None` when the lookup was not tag-scoped (update by id).
    NotFound { tag: Option<String>, key: String },
    Io {
        context: String,
        source: std::io::Error,
    },
    Remote(remote::RemoteError),
    /// An artifact could not be encoded or decoded.
    Codec { location: String, source: CodecError },
    Journal(JournalError),
    PartialUpdate(PartialUpdateWarning),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Remote(err) => err.kind(),
            Self::Codec { .. } => ErrorKind::InvalidData,
            Self::Journal(err) => err.kind(),
            Self::PartialUpdate(_) => ErrorKind::PartialUpdate,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn codec(location: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            location: location.into(),
            source,
        }
    }

    pub(crate) fn not_found(tag: Option<&str>, key: impl Into<String>) -> Self {
        Self::NotFound {
            tag: tag.map(str::to_string),
            key: key.into(),
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict { tag, name } => {
                write!(f, "a note named `{name}` already exists under tag `{tag}`")
            }
            Self::NotFound { tag: Some(tag), key } => {
                write!(f, "note `{key}` not found under tag `{tag}`")
            }
            Self::NotFound { tag: None, key } => write!(f, "note `{key}` not found"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Codec { location, source } => {
                write!(f, "artifact `{location}`: {source}")
            }
            Self::Journal(err) => write!(f, "{err}"),
            Self::PartialUpdate(warning) => write!(f, "{warning}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Remote(err) => Some(err),
            Self::Codec { source, .. } => Some(source),
            Self::Journal(err) => Some(err),
            Self::PartialUpdate(warning) => Some(warning),
            Self::Conflict { .. } | Self::NotFound { .. } => None,
        }
    }
}

impl From<NoteValidationError> for StorageError {
    fn from(value: NoteValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<JournalError> for StorageError {
    fn from(value: JournalError) -> Self {
        Self::Journal(value)
    }
}

impl From<remote::RemoteError> for StorageError {
    fn from(value: remote::RemoteError) -> Self {
        Self::Remote(value)
    }
}

/// Result of a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Journal entries that were completed or closed.
    pub resumed: usize,
    /// Locations of stale artifacts that were removed.
    pub removed: Vec<String>,
    /// Human-readable descriptions of repairs that failed.
    pub failures: Vec<String>,
}

/// Capability set shared by every storage backend.
///
/// All operations are blocking and safe to call from several threads at
/// once. Concurrent updates of the same note id are not serialized.
pub trait StorageBackend: Send + Sync {
    /// Persists a brand-new note and returns its id.
    fn save(&self, note: &Note) -> StorageResult<NoteId>;
    /// Loads one note by id (UUID text) or by name under `tag`.
    fn load(&self, tag: &str, name_or_id: &str) -> StorageResult<Note>;
    /// Lists summaries under `tag`, newest first. Unknown tags yield `[]`.
    fn list_files(&self, tag: &str) -> StorageResult<Vec<FileSummary>>;
    /// Replaces the note carrying `note.id` (content, title and/or tag).
    fn update(&self, note: &Note) -> StorageResult<NoteId>;
    /// Lists all tag groupings, sorted by name.
    fn list_tags(&self) -> StorageResult<Vec<String>>;
    /// Completes stuck updates and removes duplicate artifacts.
    fn reconcile(&self) -> StorageResult<ReconcileReport>;
}

/// How `load` interprets its `name_or_id` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteKey {
    Id(NoteId),
    Name(String),
}

impl NoteKey {
    pub fn parse(value: &str) -> Self {
        match Uuid::parse_str(value.trim()) {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Name(value.trim().to_string()),
        }
    }
}

/// Turns a title or tag into a name safe for files, folders and documents.
///
/// Path separators and reserved characters become `_`, newlines become
/// spaces, a leading `.` is replaced so artifacts never become hidden, and
/// the result is capped at `MAX_NAME_CHARS`.
pub fn sanitize_name(text: &str) -> String {
    let single_line = text.replace(['\n', '\r'], " ");
    let replaced = UNSAFE_NAME_CHARS_RE.replace_all(&single_line, "_");
    let mut clean: String = replaced.trim().chars().take(MAX_NAME_CHARS).collect();
    clean = clean.trim_end().to_string();
    if clean.starts_with('.') {
        clean.replace_range(..1, "_");
    }
    if clean.is_empty() {
        "untitled".to_string()
    } else {
        clean
    }
}

/// Whether `tags` contains `tag`, ignoring case and surrounding spaces.
pub(crate) fn carries_tag(tags: &[String], tag: &str) -> bool {
    let wanted = tag.trim().to_lowercase();
    tags.iter().any(|candidate| candidate.trim().to_lowercase() == wanted)
}

/// Merges grouping names with the secondary tags found in note headers.
///
/// A secondary tag whose sanitized form already names a grouping is not
/// repeated. The result is sorted.
pub(crate) fn merge_tags<'a>(
    groupings: impl IntoIterator<Item = String>,
    header_tags: impl IntoIterator<Item = &'a [String]>,
) -> Vec<String> {
    let groupings: BTreeSet<String> = groupings.into_iter().collect();
    let mut all = groupings.clone();
    for tags in header_tags {
        for tag in tags.iter().skip(1) {
            let tag = tag.trim();
            if !tag.is_empty() && !groupings.contains(&sanitize_name(tag)) {
                all.insert(tag.to_string());
            }
        }
    }
    all.into_iter().collect()
}

/// Orders artifacts newest first using the duplicate tie-break policy.
pub(crate) fn newest_first(
    left: (Option<DateTime<Utc>>, &str),
    right: (Option<DateTime<Utc>>, &str),
) -> Ordering {
    right.0.cmp(&left.0).then_with(|| right.1.cmp(left.1))
}

/// Keeps one summary per id (the newest) and sorts newest first.
pub(crate) fn dedupe_summaries(summaries: Vec<FileSummary>) -> Vec<FileSummary> {
    let mut by_id: HashMap<NoteId, FileSummary> = HashMap::new();
    for summary in summaries {
        match by_id.get(&summary.id) {
            Some(existing)
                if newest_first(
                    (existing.modified_at, existing.name.as_str()),
                    (summary.modified_at, summary.name.as_str()),
                ) != Ordering::Greater =>
            {
                continue;
            }
            _ => {
                by_id.insert(summary.id, summary);
            }
        }
    }

    let mut kept: Vec<FileSummary> = by_id.into_values().collect();
    kept.sort_by(|a, b| {
        newest_first(
            (a.modified_at, a.name.as_str()),
            (b.modified_at, b.name.as_str()),
        )
    });
    kept
}
