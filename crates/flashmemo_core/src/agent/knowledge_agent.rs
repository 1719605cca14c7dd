//! Retrieval router over stored notes.
//!
//! # Responsibility
//! - Route a query to search (listing) or chat (synthesized answer).
//! - Keep a bounded conversation history for follow-up questions.
//!
//! # Invariants
//! - Search mode costs exactly one model call.
//! - The synthesis prompt always carries a context section, even when no
//!   note matched.
//! - History never holds more than `MAX_HISTORY_TURNS` exchanges.

use super::intent::{classify, Intent, Mode};
use super::retriever::{ContextExcerpt, Retriever, TagScanRetriever, DEFAULT_RETRIEVAL_LIMIT};
use crate::context::AppContext;
use crate::error::ErrorKind;
use crate::llm::{ChatMessage, LanguageModel, LlmError};
use crate::model::note::FileSummary;
use crate::prompts::{render, PromptLibrary, CHAT_SYSTEM_PROMPT, SUMMARY_PROMPT};
use crate::storage::{dedupe_summaries, StorageBackend, StorageError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter, Write as _};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Context text used when retrieval found nothing.
pub const NO_MATCHES_MARKER: &str = "(no matching notes were found for this query)";
pub const MAX_HISTORY_TURNS: usize = 20;

/// Outcome of one routed query.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Search mode: matching notes, newest first.
    Matches(Vec<FileSummary>),
    /// Chat mode: synthesized text and the excerpts it was built from.
    Answer {
        text: String,
        sources: Vec<ContextExcerpt>,
    },
}

#[derive(Debug)]
pub enum AgentError {
    EmptyQuery,
    Storage(StorageError),
    LlmUnavailable(LlmError),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyQuery => ErrorKind::Validation,
            Self::Storage(err) => err.kind(),
            Self::LlmUnavailable(err) => err.kind(),
        }
    }
}

impl Display for AgentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyQuery => write!(f, "query must not be empty"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::LlmUnavailable(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AgentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyQuery => None,
            Self::Storage(err) => Some(err),
            Self::LlmUnavailable(err) => Some(err),
        }
    }
}

impl From<StorageError> for AgentError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<LlmError> for AgentError {
    fn from(value: LlmError) -> Self {
        Self::LlmUnavailable(value)
    }
}

pub struct KnowledgeAgent {
    store: Arc<dyn StorageBackend>,
    llm: Arc<dyn LanguageModel>,
    retriever: Box<dyn Retriever>,
    prompts: PromptLibrary,
    retrieval_limit: usize,
    history: Mutex<Vec<ChatMessage>>,
}

impl KnowledgeAgent {
    /// Builds an agent retrieving with a `TagScanRetriever` over `store`.
    pub fn new(
        store: Arc<dyn StorageBackend>,
        llm: Arc<dyn LanguageModel>,
        prompts: PromptLibrary,
    ) -> Self {
        Self {
            retriever: Box::new(TagScanRetriever::new(Arc::clone(&store))),
            store,
            llm,
            prompts,
            retrieval_limit: DEFAULT_RETRIEVAL_LIMIT,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_context(context: &AppContext) -> Self {
        let config = context.config();
        let retriever = TagScanRetriever::new(context.store())
            .with_excerpt_chars(config.excerpt_chars.max(1));
        Self::new(context.store(), context.llm(), context.prompts().clone())
            .with_retriever(Box::new(retriever))
            .with_retrieval_limit(config.retrieval_limit)
    }

    pub fn with_retriever(mut self, retriever: Box<dyn Retriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_retrieval_limit(mut self, limit: usize) -> Self {
        self.retrieval_limit = limit.max(1);
        self
    }

    /// Routes one query and answers it.
    ///
    /// # Errors
    /// - `EmptyQuery` for blank input, before any call.
    /// - `Storage` when tags or listings cannot be read.
    /// - `LlmUnavailable` when the synthesis call fails. A failed intent
    ///   call is not an error; it falls back to chat over all tags.
    pub fn answer(&self, query: &str) -> Result<Response, AgentError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::EmptyQuery);
        }

        let started_at = Instant::now();
        let known_tags = self.store.list_tags()?;
        let intent = classify(self.llm.as_ref(), &self.prompts, query, &known_tags);

        let response = match intent.mode {
            Mode::Search => Response::Matches(self.search(&intent)?),
            Mode::Chat => self.synthesize(query, &intent)?,
        };

        info!(
            "event=agent_answer module=agent status=ok mode={:?} duration_ms={}",
            intent.mode,
            started_at.elapsed().as_millis()
        );
        Ok(response)
    }

    /// Conversational call without retrieval.
    pub fn chat(&self, message: &str) -> Result<String, AgentError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::EmptyQuery);
        }
        let reply = self.complete_with_history(message.to_string(), message)?;
        info!("event=agent_chat module=agent status=ok");
        Ok(reply)
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    /// Number of stored exchanges.
    pub fn history_turns(&self) -> usize {
        self.history
            .lock()
            .map(|history| history.len() / 2)
            .unwrap_or(0)
    }

    fn search(&self, intent: &Intent) -> Result<Vec<FileSummary>, AgentError> {
        let mut summaries = Vec::new();
        for tag in &intent.tags {
            summaries.extend(self.store.list_files(tag)?);
        }
        Ok(dedupe_summaries(summaries))
    }

    fn synthesize(&self, query: &str, intent: &Intent) -> Result<Response, AgentError> {
        let sources = self
            .retriever
            .retrieve(query, &intent.tags, self.retrieval_limit)?;
        let context = build_context(&sources);
        let template = self.prompts.template(SUMMARY_PROMPT).unwrap_or("{context}\n\n{query}");
        let prompt = render(template, &[("context", &context), ("query", query)]);

        let text = self.complete_with_history(prompt, query)?;
        Ok(Response::Answer { text, sources })
    }

    /// Sends `prompt` after the stored history, then records the exchange
    /// as `recorded` / reply.
    fn complete_with_history(&self, prompt: String, recorded: &str) -> Result<String, AgentError> {
        let mut messages = Vec::new();
        if let Some(system) = self.prompts.template(CHAT_SYSTEM_PROMPT) {
            messages.push(ChatMessage::system(system));
        }
        if let Ok(history) = self.history.lock() {
            messages.extend(history.iter().cloned());
        }
        messages.push(ChatMessage::user(prompt));

        let reply = self.llm.complete(&messages).map_err(|err| {
            warn!(
                "event=agent_complete module=agent status=error error_kind={}",
                err.kind()
            );
            AgentError::LlmUnavailable(err)
        })?;

        if let Ok(mut history) = self.history.lock() {
            history.push(ChatMessage::user(recorded));
            history.push(ChatMessage::assistant(reply.clone()));
            let excess = history.len().saturating_sub(MAX_HISTORY_TURNS * 2);
            history.drain(..excess);
        }
        Ok(reply)
    }
}

/// Numbered context block for the synthesis prompt.
pub fn build_context(sources: &[ContextExcerpt]) -> String {
    if sources.is_empty() {
        return NO_MATCHES_MARKER.to_string();
    }
    let mut context = String::new();
    for (index, source) in sources.iter().enumerate() {
        let _ = writeln!(
            context,
            "> [{}] ({}; tags: {})\n{}\n",
            index + 1,
            source.title,
            source.tags.join(", "),
            source.excerpt
        );
    }
    context.trim_end().to_string()
}
