//! JSON meta block leading a remote document.

use super::{ensure_finite, CodecResult};
use super::note_header::HEADER_ID;
use crate::model::document::{CodeLanguage, DocumentBlock};
use crate::model::note::Metadata;
use serde_json::Value;

/// Encodes metadata as a single-line JSON code block.
pub fn encode_meta_block(meta: &Metadata) -> CodecResult<DocumentBlock> {
    for (key, value) in meta {
        ensure_finite(key, value)?;
    }
    Ok(DocumentBlock::Code {
        language: CodeLanguage::Json,
        text: serde_json::to_string(meta)?,
    })
}

/// Decodes a meta block.
///
/// Returns `Ok(None)` when the block is not a managed meta block: not a code
/// block, not a JSON object, or an object without a string `id`. Returns an
/// error when the object is ours but carries unsupported values.
pub fn decode_meta_block(block: &DocumentBlock) -> CodecResult<Option<Metadata>> {
    let DocumentBlock::Code { language, text } = block else {
        return Ok(None);
    };
    if matches!(language, CodeLanguage::Other(_)) {
        return Ok(None);
    }

    let Ok(value) = serde_json::from_str::<Value>(text.trim()) else {
        return Ok(None);
    };
    let is_managed = value
        .as_object()
        .and_then(|object| object.get(HEADER_ID))
        .is_some_and(Value::is_string);
    if !is_managed {
        return Ok(None);
    }

    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::{decode_meta_block, encode_meta_block};
    use crate::model::document::{CodeLanguage, DocumentBlock};
    use crate::model::note::{MetaValue, Metadata};
    use std::collections::BTreeMap;

    #[test]
    fn encode_then_decode_reproduces_map() {
        let mut nested = BTreeMap::new();
        nested.insert("doc_token".to_string(), MetaValue::from("doxcn123"));
        let mut meta = Metadata::new();
        meta.insert("id".to_string(), MetaValue::from("abc"));
        meta.insert("tags".to_string(), MetaValue::List(vec!["a".to_string()]));
        meta.insert("weight".to_string(), MetaValue::Number(-0.125));
        meta.insert("remote".to_string(), MetaValue::Map(nested));

        let block = encode_meta_block(&meta).expect("encode");
        let decoded = decode_meta_block(&block)
            .expect("decode")
            .expect("managed block");
        assert_eq!(decoded, meta);
    }

    #[test]
    fn foreign_blocks_are_not_meta_blocks() {
        let text = DocumentBlock::Text("{\"id\": \"abc\"}".to_string());
        assert!(decode_meta_block(&text).expect("decode").is_none());

        let code_without_id = DocumentBlock::Code {
            language: CodeLanguage::Json,
            text: "{\"title\": \"x\"}".to_string(),
        };
        assert!(decode_meta_block(&code_without_id).expect("decode").is_none());

        let plain_code = DocumentBlock::Code {
            language: CodeLanguage::PlainText,
            text: "fn main() {}".to_string(),
        };
        assert!(decode_meta_block(&plain_code).expect("decode").is_none());
    }

    #[test]
    fn managed_block_with_null_value_is_an_error() {
        let block = DocumentBlock::Code {
            language: CodeLanguage::Json,
            text: "{\"id\": \"abc\", \"broken\": null}".to_string(),
        };
        assert!(decode_meta_block(&block).is_err());
    }
}
