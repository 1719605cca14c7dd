//! Structural blocks of a remote document.
//!
//! Backend-neutral shape of the blocks the remote-document store reads and
//! writes. Transport implementations translate these to their wire format.

/// Language tag of a code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    PlainText,
    Json,
    /// Any language the core does not interpret.
    Other(u32),
}

/// One structural block of a remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentBlock {
    /// Paragraph text.
    Text(String),
    /// Heading text with level 1..=9.
    Heading { level: u8, text: String },
    Code {
        language: CodeLanguage,
        text: String,
    },
    /// Embedded image; `reference` is a media token or URL.
    Image { reference: String },
    /// Any block kind the core does not interpret.
    Other { block_type: u32 },
}

impl DocumentBlock {
    /// Returns readable text carried by paragraph and heading blocks.
    pub fn plain_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Heading { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }
}
