//! Key-value header block for filesystem notes.
//!
//! Layout:
//!
//! ```text
//! ---
//! id: "5b0c..."
//! tags: ["python", "snippets"]
//! ---
//!
//! body
//! ```
//!
//! Every value is single-line JSON, which keeps the block valid YAML front
//! matter while making the round-trip exact. Hand-edited values that are not
//! JSON are read leniently as text or inline lists.

use super::{ensure_finite, CodecError, CodecResult};
use crate::model::note::{MetaValue, Metadata};
use once_cell::sync::Lazy;
use regex::Regex;

const FENCE: &str = "---";

static PLAIN_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("valid header key regex"));

/// Encodes a metadata map as a fenced header block ending with a newline.
pub fn encode_header(meta: &Metadata) -> CodecResult<String> {
    let mut out = String::from(FENCE);
    out.push('\n');
    for (key, value) in meta {
        ensure_finite(key, value)?;
        out.push_str(&encode_key(key)?);
        out.push_str(": ");
        out.push_str(&serde_json::to_string(value)?);
        out.push('\n');
    }
    out.push_str(FENCE);
    out.push('\n');
    Ok(out)
}

/// Decodes the lines between the two fences back into a metadata map.
pub fn decode_header(block: &str) -> CodecResult<Metadata> {
    let mut meta = Metadata::new();
    for (index, line) in block.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, raw_value) = split_key(trimmed).ok_or_else(|| CodecError::MalformedLine {
            line: index + 1,
            text: trimmed.to_string(),
        })?;
        let value = decode_value(&key, raw_value.trim())?;
        meta.insert(key, value);
    }
    Ok(meta)
}

/// Splits a full file into `(header block, body)`.
///
/// The header block excludes both fences. One blank separator line after
/// the closing fence is consumed. Files without a header return `None` and
/// the untouched text.
pub fn split_document(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim_start_matches(['\u{feff}', '\n', '\r']);
    let Some(rest) = strip_fence_line(trimmed) else {
        return (None, text);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FENCE {
            let header = &rest[..offset];
            let after = &rest[offset + line.len()..];
            let body = after
                .strip_prefix("\r\n")
                .or_else(|| after.strip_prefix('\n'))
                .unwrap_or(after);
            return (Some(header), body);
        }
        offset += line.len();
    }

    (None, text)
}

/// Joins an encoded header and a body into full file text.
pub fn join_document(header: &str, body: &str) -> String {
    let mut out = String::with_capacity(header.len() + body.len() + 1);
    out.push_str(header);
    out.push('\n');
    out.push_str(body);
    out
}

/// Returns true when `line` is a header fence.
pub fn is_fence(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == FENCE
}

fn strip_fence_line(text: &str) -> Option<&str> {
    text.strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))
}

fn encode_key(key: &str) -> CodecResult<String> {
    if PLAIN_KEY_RE.is_match(key) {
        Ok(key.to_string())
    } else {
        Ok(serde_json::to_string(key)?)
    }
}

fn split_key(line: &str) -> Option<(String, &str)> {
    if line.starts_with('"') {
        let mut stream = serde_json::Deserializer::from_str(line).into_iter::<String>();
        let key = stream.next()?.ok()?;
        let rest = line[stream.byte_offset()..].trim_start();
        return rest.strip_prefix(':').map(|value| (key, value));
    }

    line.split_once(':')
        .map(|(key, value)| (key.trim().to_string(), value))
}

fn decode_value(key: &str, raw: &str) -> CodecResult<MetaValue> {
    match serde_json::from_str::<MetaValue>(raw) {
        Ok(value) => Ok(value),
        Err(_) if looks_like_json(raw) && !looks_like_inline_list(raw) => {
            Err(CodecError::InvalidValue {
                key: key.to_string(),
                message: format!("unsupported JSON value `{raw}`"),
            })
        }
        Err(_) => Ok(lenient_value(raw)),
    }
}

fn looks_like_json(raw: &str) -> bool {
    raw.starts_with('{') || raw.starts_with('[') || raw == "null"
}

fn looks_like_inline_list(raw: &str) -> bool {
    raw.starts_with('[') && raw.ends_with(']')
}

/// Reads hand-written YAML-ish values: `My title`, `'quoted'`, `[a, b]`.
fn lenient_value(raw: &str) -> MetaValue {
    if looks_like_inline_list(raw) {
        let inner = &raw[1..raw.len() - 1];
        let items = inner
            .split(',')
            .map(|item| unquote(item.trim()))
            .filter(|item| !item.is_empty())
            .collect();
        return MetaValue::List(items);
    }
    MetaValue::Text(unquote(raw))
}

fn unquote(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_header, encode_header, join_document, split_document};
    use crate::codec::CodecError;
    use crate::model::note::{MetaValue, Metadata};
    use std::collections::BTreeMap;

    fn sample_meta() -> Metadata {
        let mut nested = BTreeMap::new();
        nested.insert("from".to_string(), MetaValue::from("clipboard"));
        nested.insert("depth".to_string(), MetaValue::Number(2.5));

        let mut meta = Metadata::new();
        meta.insert("id".to_string(), MetaValue::from("abc"));
        meta.insert("title".to_string(), MetaValue::from("Line: with \"quotes\"\nand newline"));
        meta.insert(
            "tags".to_string(),
            MetaValue::List(vec!["python".to_string(), "snippets".to_string()]),
        );
        meta.insert("pinned".to_string(), MetaValue::Bool(true));
        meta.insert("origin".to_string(), MetaValue::Map(nested));
        meta.insert("odd key: here".to_string(), MetaValue::from("value"));
        meta
    }

    #[test]
    fn encode_then_decode_reproduces_map() {
        let meta = sample_meta();
        let encoded = encode_header(&meta).expect("encode should succeed");
        let (header, body) = split_document(&encoded);
        assert_eq!(body, "");
        let decoded = decode_header(header.expect("header present")).expect("decode");
        assert_eq!(decoded, meta);
    }

    #[test]
    fn split_document_separates_header_and_exact_body() {
        let header = encode_header(&sample_meta()).expect("encode");
        let body = "first line\n\n---\nnot a header fence";
        let text = join_document(&header, body);

        let (parsed_header, parsed_body) = split_document(&text);
        assert!(parsed_header.is_some());
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn split_document_without_header_returns_text() {
        let (header, body) = split_document("plain body\n");
        assert!(header.is_none());
        assert_eq!(body, "plain body\n");
    }

    #[test]
    fn decode_header_reads_hand_written_values() {
        let decoded =
            decode_header("title: My note\ntags: [work, 'ideas']\ncreated_at: 2024-01-01")
                .expect("lenient decode");
        assert_eq!(decoded["title"], MetaValue::from("My note"));
        assert_eq!(
            decoded["tags"],
            MetaValue::List(vec!["work".to_string(), "ideas".to_string()])
        );
        assert_eq!(decoded["created_at"], MetaValue::from("2024-01-01"));
    }

    #[test]
    fn encode_rejects_non_finite_numbers() {
        let mut meta = Metadata::new();
        meta.insert("score".to_string(), MetaValue::Number(f64::NAN));
        let err = encode_header(&meta).expect_err("NaN must be rejected");
        assert!(matches!(err, CodecError::NonFiniteNumber(key) if key == "score"));
    }

    #[test]
    fn decode_rejects_lines_without_separator() {
        let err = decode_header("no separator here").expect_err("line must be rejected");
        assert!(matches!(err, CodecError::MalformedLine { line: 1, .. }));
    }
}
