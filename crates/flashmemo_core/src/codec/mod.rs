//! Metadata codec: note metadata <-> backend-native carriers.
//!
//! # Responsibility
//! - Encode/decode the header block prepended to filesystem notes.
//! - Encode/decode the JSON meta block leading a remote document.
//! - Map a `Note` to the shared header field set and back.
//!
//! # Invariants
//! - Pure and stateless; no I/O.
//! - `decode(encode(m)) == m` for every map of text, finite numbers,
//!   booleans, string lists and nested maps, for both carriers.

use crate::error::ErrorKind;
use crate::model::note::MetaValue;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod front_matter;
pub mod json_block;
pub mod note_header;

pub use front_matter::{decode_header, encode_header, join_document, split_document};
pub use json_block::{decode_meta_block, encode_meta_block};
pub use note_header::{header_note_id, header_tags, header_to_note, note_to_header, DecodeHints};

pub type CodecResult<T> = Result<T, CodecError>;

/// Codec failures. Always data problems, never transport problems.
#[derive(Debug)]
pub enum CodecError {
    /// Number that JSON cannot represent (NaN or infinity).
    NonFiniteNumber(String),
    /// Header line without a `key: value` shape.
    MalformedLine { line: usize, text: String },
    /// Header value that is not a supported metadata value.
    InvalidValue { key: String, message: String },
    MissingField(&'static str),
    InvalidField {
        field: &'static str,
        message: String,
    },
    Json(serde_json::Error),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidData
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteNumber(key) => {
                write!(f, "metadata value for `{key}` is not a finite number")
            }
            Self::MalformedLine { line, text } => {
                write!(f, "malformed header line {line}: `{text}`")
            }
            Self::InvalidValue { key, message } => {
                write!(f, "invalid header value for `{key}`: {message}")
            }
            Self::MissingField(field) => write!(f, "header field `{field}` is missing"),
            Self::InvalidField { field, message } => {
                write!(f, "header field `{field}` is invalid: {message}")
            }
            Self::Json(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Rejects NaN/infinite numbers anywhere in a value tree.
pub(crate) fn ensure_finite(key: &str, value: &MetaValue) -> CodecResult<()> {
    match value {
        MetaValue::Number(number) if !number.is_finite() => {
            Err(CodecError::NonFiniteNumber(key.to_string()))
        }
        MetaValue::Map(map) => {
            for (nested_key, nested) in map {
                ensure_finite(nested_key, nested)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
