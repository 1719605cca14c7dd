//! Note domain model.
//!
//! # Responsibility
//! - Define the canonical note record shared by every storage backend.
//! - Define the capture input contract and the cheap listing projection.
//!
//! # Invariants
//! - `id` is stable and never reassigned by an update.
//! - `tags[0]` is the primary tag and decides physical placement.
//! - Metadata values are restricted to the closed `MetaValue` union, so the
//!   codec round-trip is checkable without reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a note across backends and migrations.
pub type NoteId = Uuid;

/// Open side-channel metadata. Backends may add their own keys.
pub type Metadata = BTreeMap<String, MetaValue>;

/// Metadata key written by the capture pipeline.
pub const ORIGIN_METADATA_KEY: &str = "origin";

/// Payload modality of a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    /// Inline text body.
    #[default]
    Text,
    /// `content` holds an image reference (path, URL or media token).
    Image,
    /// `content` holds an audio reference.
    Audio,
}

impl NoteType {
    /// Stable string id used in persisted headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }

    /// Parses a persisted type label, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

impl Display for NoteType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metadata value.
///
/// Untagged so the JSON carrier stays human-readable. Variant order matters
/// for decoding: a JSON string always lands in `Text`, an array of strings
/// in `List`, an object in `Map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, MetaValue>> for MetaValue {
    fn from(value: BTreeMap<String, MetaValue>) -> Self {
        Self::Map(value)
    }
}

/// Validation errors for note invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteValidationError {
    EmptyContent,
    EmptyTitle,
    MissingPrimaryTag,
    BlankTag,
    DuplicateTag(String),
}

impl Display for NoteValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyContent => write!(f, "note content must not be empty"),
            Self::EmptyTitle => write!(f, "note title must not be empty"),
            Self::MissingPrimaryTag => write!(f, "note must carry at least a primary tag"),
            Self::BlankTag => write!(f, "note tags must not be blank"),
            Self::DuplicateTag(tag) => write!(f, "note tag is duplicated: `{tag}`"),
        }
    }
}

impl Error for NoteValidationError {}

/// Canonical unit of knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Assigned once at creation, preserved by every update.
    pub id: NoteId,
    /// Doubles as the file/document name.
    pub title: String,
    pub content: String,
    /// Ordered set; the first entry is the primary tag.
    pub tags: Vec<String>,
    /// Serialized as `type` to match the persisted header naming.
    #[serde(rename = "type")]
    pub kind: NoteType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Note {
    /// Creates a text note with a generated stable id.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), title, content, tags)
    }

    /// Creates a text note with a caller-provided id.
    ///
    /// Used by decode paths where identity already exists in a header.
    pub fn with_id(
        id: NoteId,
        title: impl Into<String>,
        content: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
            tags,
            kind: NoteType::Text,
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Tag deciding physical placement.
    pub fn primary_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    /// Cross-cutting tags recorded only in the header.
    pub fn secondary_tags(&self) -> &[String] {
        self.tags.get(1..).unwrap_or(&[])
    }

    /// Checks invariants required before any persistence attempt.
    pub fn validate(&self) -> Result<(), NoteValidationError> {
        if self.content.trim().is_empty() {
            return Err(NoteValidationError::EmptyContent);
        }
        if self.title.trim().is_empty() {
            return Err(NoteValidationError::EmptyTitle);
        }
        if self.tags.is_empty() {
            return Err(NoteValidationError::MissingPrimaryTag);
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.trim().is_empty() {
                return Err(NoteValidationError::BlankTag);
            }
            if !seen.insert(tag.as_str()) {
                return Err(NoteValidationError::DuplicateTag(tag.clone()));
            }
        }
        Ok(())
    }
}

/// Output contract of any capture source.
///
/// Carries no identity; the capture pipeline turns it into a `Note`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturePayload {
    pub content: String,
    pub title: Option<String>,
    pub kind: Option<NoteType>,
    /// Suggested tags, normalized by the pipeline.
    pub tags: Vec<String>,
    /// Describes where the payload came from (e.g. `{"from": "clipboard"}`).
    pub origin: Metadata,
}

impl CapturePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_kind(mut self, kind: NoteType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_origin(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.origin.insert(key.into(), value.into());
        self
    }
}

/// Lightweight listing projection of a persisted note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub id: NoteId,
    /// Artifact name (the stored title).
    pub name: String,
    /// Primary tag the listing came from.
    pub tag: String,
    /// Last modification time reported by the backend, when known.
    pub modified_at: Option<DateTime<Utc>>,
}
