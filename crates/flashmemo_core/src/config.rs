//! Application configuration.
//!
//! # Responsibility
//! - Read `config.json`, filling every missing field with its default.
//! - Write a default file on first start.
//!
//! # Invariants
//! - A partial file is merged over defaults; unknown keys are ignored.
//! - Loading never touches storage or the network.

use crate::error::ErrorKind;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
const JOURNAL_DIR: &str = ".flashmemo";
const JOURNAL_FILE: &str = "journal.sqlite3";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    /// A setting is present but unusable, e.g. remote storage without
    /// credentials.
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Parse { .. } => ErrorKind::InvalidData,
            Self::Invalid(_) => ErrorKind::Validation,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "config io error at {}: {source}", path.display()),
            Self::Parse { path, source } => {
                write!(f, "config file {} is not valid: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Local,
    #[serde(alias = "feishu")]
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub app_id: String,
    pub app_secret: String,
    pub root_token: String,
    pub base_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            root_token: String::new(),
            base_url: "https://open.feishu.cn/open-apis".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("app_id", &self.app_id),
            ("app_secret", &self.app_secret),
            ("root_token", &self.root_token),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage_type: StorageType,
    pub storage_path: PathBuf,
    /// Local mirror written on every capture, when set.
    pub backup_path: Option<PathBuf>,
    /// Defaults to `<storage_path>/.flashmemo/journal.sqlite3`.
    pub journal_path: Option<PathBuf>,
    pub prompts_path: PathBuf,
    pub remote: RemoteConfig,
    pub llm: LlmConfig,
    pub request_timeout_secs: u64,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub retrieval_limit: usize,
    pub excerpt_chars: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Local,
            storage_path: PathBuf::from("./my_notes_data"),
            backup_path: None,
            journal_path: None,
            prompts_path: PathBuf::from("./prompts"),
            remote: RemoteConfig::default(),
            llm: LlmConfig::default(),
            request_timeout_secs: 30,
            log_level: None,
            log_dir: None,
            retrieval_limit: 20,
            excerpt_chars: 500,
        }
    }
}

impl AppConfig {
    /// Parses a config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path`, or writes and returns the defaults when it is missing.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        config.save(path)?;
        info!(
            "event=config_create module=config status=ok path={}",
            path.display()
        );
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(io_error)
    }

    pub fn resolved_journal_path(&self) -> PathBuf {
        self.journal_path
            .clone()
            .unwrap_or_else(|| self.storage_path.join(JOURNAL_DIR).join(JOURNAL_FILE))
    }
}
