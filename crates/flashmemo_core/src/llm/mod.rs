//! Language model collaborator.
//!
//! # Responsibility
//! - Define the one call shape the router needs: a message list in, text out.
//! - Classify collaborator failures so callers can degrade instead of crash.
//!
//! # Invariants
//! - Implementations are blocking and safe to share across threads.
//! - Prompt text never reaches the logs.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod openai;

pub use openai::OpenAiChatClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// No API key or endpoint configured.
    NotConfigured,
    /// Transport failure or non-success HTTP status.
    Unavailable(String),
    /// The reply did not contain a completion.
    InvalidResponse(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::LlmUnavailable
    }
}

impl Display for LlmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "language model is not configured"),
            Self::Unavailable(message) => write!(f, "language model unavailable: {message}"),
            Self::InvalidResponse(message) => {
                write!(f, "language model reply is malformed: {message}")
            }
        }
    }
}

impl Error for LlmError {}

/// Chat-completion collaborator.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Stand-in used when no model is configured; every call fails.
pub struct UnconfiguredModel;

impl LanguageModel for UnconfiguredModel {
    fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured)
    }
}
