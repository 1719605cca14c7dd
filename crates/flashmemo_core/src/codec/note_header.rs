//! Shared field set written by both carriers.
//!
//! Both backends persist the same header keys, so a note moved between
//! backends keeps its identity and classification.

use super::{CodecError, CodecResult};
use crate::model::note::{MetaValue, Metadata, Note, NoteId, NoteType};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

pub const HEADER_ID: &str = "id";
pub const HEADER_TITLE: &str = "title";
pub const HEADER_TYPE: &str = "type";
pub const HEADER_TAGS: &str = "tags";
pub const HEADER_CREATED_AT: &str = "created_at";
pub const HEADER_METADATA: &str = "metadata";

const CORE_HEADER_KEYS: &[&str] = &[
    HEADER_ID,
    HEADER_TITLE,
    HEADER_TYPE,
    HEADER_TAGS,
    HEADER_CREATED_AT,
    HEADER_METADATA,
];

/// Values used when a hand-edited artifact omits optional header fields.
#[derive(Debug, Clone, Copy)]
pub struct DecodeHints<'a> {
    /// Artifact name, used when the header carries no title.
    pub name: &'a str,
    /// Tag the artifact was found under, used when the header has no tags.
    pub tag: &'a str,
}

/// Builds the header map for one note.
pub fn note_to_header(note: &Note) -> Metadata {
    let mut header = Metadata::new();
    header.insert(HEADER_ID.to_string(), MetaValue::Text(note.id.to_string()));
    header.insert(HEADER_TITLE.to_string(), MetaValue::Text(note.title.clone()));
    header.insert(
        HEADER_TYPE.to_string(),
        MetaValue::Text(note.kind.as_str().to_string()),
    );
    header.insert(HEADER_TAGS.to_string(), MetaValue::List(note.tags.clone()));
    header.insert(
        HEADER_CREATED_AT.to_string(),
        MetaValue::Text(
            note.created_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
    );
    if !note.metadata.is_empty() {
        header.insert(
            HEADER_METADATA.to_string(),
            MetaValue::Map(note.metadata.clone()),
        );
    }
    header
}

/// Reads the note id from a decoded header.
pub fn header_note_id(header: &Metadata) -> CodecResult<NoteId> {
    let raw = header
        .get(HEADER_ID)
        .ok_or(CodecError::MissingField(HEADER_ID))?
        .as_text()
        .ok_or_else(|| invalid(HEADER_ID, "expected text"))?;
    Uuid::parse_str(raw.trim()).map_err(|err| invalid(HEADER_ID, &err.to_string()))
}

/// Tags listed in a decoded header, primary first. Empty when absent.
pub fn header_tags(header: &Metadata) -> Vec<String> {
    match header.get(HEADER_TAGS) {
        Some(MetaValue::List(tags)) => tags.clone(),
        Some(MetaValue::Text(tag)) if !tag.trim().is_empty() => vec![tag.clone()],
        _ => Vec::new(),
    }
}

/// Rebuilds a note from its header and body.
///
/// Header keys outside the core set are kept in `metadata` (without
/// overriding keys already there), so hand-added fields survive an update.
pub fn header_to_note(
    mut header: Metadata,
    content: String,
    hints: DecodeHints<'_>,
) -> CodecResult<Note> {
    let id = header_note_id(&header)?;

    let title = match header.remove(HEADER_TITLE) {
        Some(MetaValue::Text(title)) if !title.trim().is_empty() => title,
        Some(MetaValue::Text(_)) | None => hints.name.to_string(),
        Some(_) => return Err(invalid(HEADER_TITLE, "expected text")),
    };

    let kind = match header.remove(HEADER_TYPE) {
        Some(MetaValue::Text(label)) => NoteType::parse(&label)
            .ok_or_else(|| invalid(HEADER_TYPE, &format!("unknown note type `{label}`")))?,
        None => NoteType::Text,
        Some(_) => return Err(invalid(HEADER_TYPE, "expected text")),
    };

    let tags = match header.remove(HEADER_TAGS) {
        Some(MetaValue::List(tags)) if !tags.is_empty() => tags,
        Some(MetaValue::Text(tag)) if !tag.trim().is_empty() => vec![tag],
        Some(MetaValue::List(_)) | Some(MetaValue::Text(_)) | None => vec![hints.tag.to_string()],
        Some(_) => return Err(invalid(HEADER_TAGS, "expected a list of text")),
    };

    let created_at = match header.remove(HEADER_CREATED_AT) {
        Some(MetaValue::Text(raw)) => parse_timestamp(&raw)?,
        None => DateTime::<Utc>::default(),
        Some(_) => return Err(invalid(HEADER_CREATED_AT, "expected text")),
    };

    let mut metadata = match header.remove(HEADER_METADATA) {
        Some(MetaValue::Map(map)) => map,
        None => Metadata::new(),
        Some(_) => return Err(invalid(HEADER_METADATA, "expected a map")),
    };
    for (key, value) in header {
        if CORE_HEADER_KEYS.contains(&key.as_str()) {
            continue;
        }
        metadata.entry(key).or_insert(value);
    }

    Ok(Note {
        id,
        title,
        content,
        tags,
        kind,
        created_at,
        metadata,
    })
}

fn parse_timestamp(raw: &str) -> CodecResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| invalid(HEADER_CREATED_AT, &err.to_string()))
}

fn invalid(field: &'static str, message: &str) -> CodecError {
    CodecError::InvalidField {
        field,
        message: message.to_string(),
    }
}
