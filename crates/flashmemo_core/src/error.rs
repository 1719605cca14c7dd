//! Cross-layer error classification.
//!
//! Every layer keeps its own error enum. Each of them maps onto one
//! `ErrorKind`, so callers decide recoverability without string matching.

use std::fmt::{Display, Formatter};

/// Error category shared by all layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input rejected before any I/O.
    Validation,
    /// Naming collision on create.
    Conflict,
    /// Load/update target missing.
    NotFound,
    /// Disk or transport failure.
    Io,
    /// LLM collaborator failed or is not configured.
    LlmUnavailable,
    /// Update succeeded but left a stale artifact behind.
    PartialUpdate,
    /// Persisted artifact or configuration cannot be decoded.
    InvalidData,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Io => "io",
            Self::LlmUnavailable => "llm_unavailable",
            Self::PartialUpdate => "partial_update",
            Self::InvalidData => "invalid_data",
        }
    }

    /// Whether an integration layer may retry or continue after this error.
    ///
    /// `PartialUpdate` is recoverable because the new artifact is
    /// authoritative; a later reconcile removes the stale one.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Io | Self::LlmUnavailable | Self::PartialUpdate)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
