//! Capture ingestion use-case.
//!
//! # Responsibility
//! - Validate capture payloads before any storage call.
//! - Assign identity, title, tags and origin metadata.
//! - Persist through the configured backend, optionally mirroring to a
//!   backup store.
//!
//! # Invariants
//! - Blank content never reaches a backend.
//! - Tags are trimmed, lowercased and deduplicated in first-seen order; an
//!   empty set becomes `["inbox"]`.
//! - A name collision is retried exactly once with an id-suffixed title
//!   that still fits within `MAX_NAME_CHARS`.
//! - The backup receives the note only after the primary save succeeded,
//!   under its final title.

use crate::context::AppContext;
use crate::error::ErrorKind;
use crate::model::note::{
    CapturePayload, MetaValue, Note, NoteType, NoteValidationError, ORIGIN_METADATA_KEY,
};
use crate::storage::{sanitize_name, StorageBackend, StorageError, MAX_NAME_CHARS};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Tag assigned when a capture carries none.
pub const DEFAULT_TAG: &str = "inbox";
const TITLE_SNIPPET_CHARS: usize = 10;
const CONFLICT_SUFFIX_CHARS: usize = 8;

#[derive(Debug)]
pub enum CaptureError {
    /// Payload rejected before any storage call.
    Validation(NoteValidationError),
    Storage(StorageError),
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(err) => err.kind(),
        }
    }
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "capture rejected: {err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<StorageError> for CaptureError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Validation(err) => Self::Validation(err),
            other => Self::Storage(other),
        }
    }
}

/// Ingestion pipeline from capture payload to stored note.
pub struct CaptureService {
    store: Arc<dyn StorageBackend>,
    backup: Option<Arc<dyn StorageBackend>>,
}

impl CaptureService {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self {
            store,
            backup: None,
        }
    }

    /// Mirrors every capture into `backup` on a best-effort basis.
    pub fn with_backup(mut self, backup: Arc<dyn StorageBackend>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn from_context(context: &AppContext) -> Self {
        Self {
            store: context.store(),
            backup: context.backup(),
        }
    }

    /// Turns one payload into a persisted note and returns it.
    ///
    /// # Errors
    /// - `Validation` when the content is blank; the backend is not called.
    /// - `Storage` when the backend rejects the note, including a second
    ///   name collision after the suffixed retry.
    pub fn ingest(&self, payload: CapturePayload) -> Result<Note, CaptureError> {
        if payload.content.trim().is_empty() {
            info!("event=capture_ingest module=service status=rejected reason=empty_content");
            return Err(CaptureError::Validation(NoteValidationError::EmptyContent));
        }

        let started_at = Instant::now();
        let mut note = build_note(payload, Uuid::new_v4(), Utc::now());

        match self.store.save(&note) {
            Ok(_) => {}
            Err(StorageError::Conflict { .. }) => {
                note.title = suffixed_title(&note.title, note.id);
                info!("event=capture_ingest module=service status=retry reason=conflict");
                self.store.save(&note)?;
            }
            Err(err) => {
                warn!(
                    "event=capture_ingest module=service status=error error_kind={}",
                    err.kind()
                );
                return Err(err.into());
            }
        }

        if let Some(backup) = &self.backup {
            if let Err(err) = backup.save(&note) {
                warn!(
                    "event=capture_backup module=service status=error error_kind={}",
                    err.kind()
                );
            }
        }

        info!(
            "event=capture_ingest module=service status=ok kind={} tag_count={} duration_ms={}",
            note.kind,
            note.tags.len(),
            started_at.elapsed().as_millis()
        );
        Ok(note)
    }
}

/// Maps a validated payload to a new note.
fn build_note(payload: CapturePayload, id: Uuid, now: DateTime<Utc>) -> Note {
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback_title(&payload.content, now));

    let mut tags = normalize_tags(&payload.tags);
    if tags.is_empty() {
        tags.push(DEFAULT_TAG.to_string());
    }

    let mut note = Note::with_id(id, title, payload.content, tags);
    note.kind = payload.kind.unwrap_or(NoteType::Text);
    note.created_at = now;
    if !payload.origin.is_empty() {
        note.metadata.insert(
            ORIGIN_METADATA_KEY.to_string(),
            MetaValue::Map(payload.origin),
        );
    }
    note
}

/// Trims, lowercases and deduplicates tags, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// `{YYYY-MM-DD}_{first content chars}` for captures without a title.
pub fn fallback_title(content: &str, now: DateTime<Utc>) -> String {
    let snippet: String = content.trim().chars().take(TITLE_SNIPPET_CHARS).collect();
    let snippet = sanitize_name(&snippet);
    let snippet = if snippet == "untitled" || snippet.trim_matches('_').is_empty() {
        "note".to_string()
    } else {
        snippet
    };
    format!("{}_{}", now.format("%Y-%m-%d"), snippet)
}

/// `{title} ({first id chars})`, shortening `title` so the suffix survives
/// name truncation.
fn suffixed_title(title: &str, id: Uuid) -> String {
    let hex = id.simple().to_string();
    let suffix = format!(" ({})", &hex[..CONFLICT_SUFFIX_CHARS]);
    let room = MAX_NAME_CHARS - suffix.chars().count();
    let base: String = title.trim().chars().take(room).collect();
    format!("{}{suffix}", base.trim_end())
}

#[cfg(test)]
mod tests {
    use super::{build_note, fallback_title, normalize_tags, suffixed_title, DEFAULT_TAG};
    use crate::storage::{sanitize_name, MAX_NAME_CHARS};
    use crate::model::note::{CapturePayload, MetaValue, NoteType};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn tags_are_normalized_in_first_seen_order() {
        let tags = vec![
            " Python ".to_string(),
            "snippets".to_string(),
            "python".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["python", "snippets"]);
    }

    #[test]
    fn fallback_title_uses_date_and_sanitized_snippet() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(
            fallback_title("a/b: quick\nthought here", now),
            "2024-03-09_a_b_ quick"
        );
        assert_eq!(fallback_title("???", now), "2024-03-09_note");
    }

    #[test]
    fn build_note_applies_defaults_and_origin() {
        let now = Utc::now();
        let payload = CapturePayload::text("buy milk").with_origin("from", "clipboard");
        let note = build_note(payload, Uuid::new_v4(), now);

        assert_eq!(note.tags, vec![DEFAULT_TAG.to_string()]);
        assert_eq!(note.kind, NoteType::Text);
        assert_eq!(note.created_at, now);
        let origin = note.metadata["origin"].as_map().expect("origin map");
        assert_eq!(origin["from"], MetaValue::from("clipboard"));
    }

    #[test]
    fn suffixed_title_appends_short_id() {
        let id = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(suffixed_title("Buy milk", id), "Buy milk (01234567)");
    }

    #[test]
    fn suffixed_title_fits_the_name_limit() {
        let id = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();
        let long = format!("{} tail", "word ".repeat(20));
        let title = suffixed_title(&long, id);
        assert_eq!(title.chars().count(), MAX_NAME_CHARS);
        assert!(title.ends_with(" (01234567)"));
        assert_eq!(sanitize_name(&title), title);

        let spaced = suffixed_title(&format!("{} x", "a".repeat(48)), id);
        assert_eq!(spaced, format!("{} (01234567)", "a".repeat(48)));
    }
}
