//! Core of FlashMemo: capture, storage and retrieval of personal notes.
//!
//! Notes flow in through `CaptureService`, land in one `StorageBackend`
//! (local markdown files or a remote document service) and are answered
//! from by `KnowledgeAgent`.

pub mod agent;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod journal;
pub mod llm;
pub mod logging;
pub mod model;
pub mod prompts;
pub mod service;
pub mod storage;

pub use agent::{AgentError, KnowledgeAgent, Response};
pub use config::{AppConfig, ConfigError, StorageType};
pub use context::{AppContext, ContextError};
pub use error::ErrorKind;
pub use llm::{ChatMessage, LanguageModel, LlmError};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::note::{CapturePayload, FileSummary, MetaValue, Metadata, Note, NoteId, NoteType};
pub use service::{CaptureError, CaptureService};
pub use storage::{
    FsNoteStore, PartialUpdateWarning, ReconcileReport, RemoteDocStore, StorageBackend,
    StorageError, StorageResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
