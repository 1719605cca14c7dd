//! Startup wiring.
//!
//! `AppContext` is built once from `AppConfig` and handed by reference to
//! the services that need it. There is no global registry.

use crate::config::{AppConfig, ConfigError, StorageType};
use crate::error::ErrorKind;
use crate::journal::{JournalError, UpdateJournal};
use crate::llm::{LanguageModel, LlmError, OpenAiChatClient, UnconfiguredModel};
use crate::prompts::PromptLibrary;
use crate::storage::remote::HttpDocumentApi;
use crate::storage::{FsNoteStore, RemoteDocStore, StorageBackend, StorageError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum ContextError {
    Config(ConfigError),
    Storage(StorageError),
    Journal(JournalError),
    Llm(LlmError),
}

impl ContextError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(err) => err.kind(),
            Self::Storage(err) => err.kind(),
            Self::Journal(err) => err.kind(),
            Self::Llm(err) => err.kind(),
        }
    }
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "storage setup failed: {err}"),
            Self::Journal(err) => write!(f, "journal setup failed: {err}"),
            Self::Llm(err) => write!(f, "llm setup failed: {err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Journal(err) => Some(err),
            Self::Llm(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ContextError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StorageError> for ContextError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<JournalError> for ContextError {
    fn from(value: JournalError) -> Self {
        Self::Journal(value)
    }
}

/// Collaborators chosen once at startup.
pub struct AppContext {
    config: AppConfig,
    store: Arc<dyn StorageBackend>,
    backup: Option<Arc<dyn StorageBackend>>,
    llm: Arc<dyn LanguageModel>,
    prompts: PromptLibrary,
}

impl AppContext {
    /// Opens the journal, the configured backend, the optional backup and
    /// the model client.
    ///
    /// # Errors
    /// - `Config` when remote storage is selected with incomplete
    ///   credentials.
    /// - `Storage` / `Journal` when the local directories or the journal
    ///   cannot be opened.
    ///
    /// A blank LLM key is not an error: capture keeps working and every
    /// model call reports `NotConfigured`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ContextError> {
        let journal = Arc::new(UpdateJournal::open(config.resolved_journal_path())?);
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));

        let store: Arc<dyn StorageBackend> = match config.storage_type {
            StorageType::Local => Arc::new(
                FsNoteStore::open(&config.storage_path)?.with_journal(Arc::clone(&journal)),
            ),
            StorageType::Remote => {
                let missing = config.remote.missing_fields();
                if !missing.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "remote storage requires {}",
                        missing.join(", ")
                    ))
                    .into());
                }
                let api = HttpDocumentApi::new(
                    config.remote.base_url.as_str(),
                    config.remote.app_id.as_str(),
                    config.remote.app_secret.as_str(),
                    timeout,
                )
                .map_err(StorageError::from)?;
                Arc::new(
                    RemoteDocStore::new(Arc::new(api), config.remote.root_token.as_str())
                        .with_journal(Arc::clone(&journal)),
                )
            }
        };

        let backup = match &config.backup_path {
            Some(path) => {
                let backup: Arc<dyn StorageBackend> = Arc::new(FsNoteStore::open(path)?);
                Some(backup)
            }
            None => None,
        };

        let llm: Arc<dyn LanguageModel> = match OpenAiChatClient::new(
            &config.llm.api_base,
            config.llm.api_key.as_str(),
            config.llm.model.as_str(),
            timeout,
        ) {
            Ok(client) => Arc::new(client),
            Err(LlmError::NotConfigured) => {
                warn!("event=context_init module=context status=warn reason=llm_not_configured");
                Arc::new(UnconfiguredModel)
            }
            Err(err) => return Err(ContextError::Llm(err)),
        };

        if let Err(err) = PromptLibrary::ensure_defaults(&config.prompts_path) {
            warn!("event=prompts_init module=context status=error error={err}");
        }
        let prompts = PromptLibrary::load(&config.prompts_path);

        info!(
            "event=context_init module=context status=ok storage_type={:?} backup={}",
            config.storage_type,
            backup.is_some()
        );
        Ok(Self {
            config: config.clone(),
            store,
            backup,
            llm,
            prompts,
        })
    }

    /// Context over explicit collaborators, for embedding and tests.
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn StorageBackend>,
        llm: Arc<dyn LanguageModel>,
        prompts: PromptLibrary,
    ) -> Self {
        Self {
            config,
            store,
            backup: None,
            llm,
            prompts,
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn StorageBackend>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.store)
    }

    pub fn backup(&self) -> Option<Arc<dyn StorageBackend>> {
        self.backup.clone()
    }

    pub fn llm(&self) -> Arc<dyn LanguageModel> {
        Arc::clone(&self.llm)
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }
}
