//! Bounded context retrieval.

use crate::model::note::{FileSummary, NoteId};
use crate::storage::{dedupe_summaries, StorageBackend, StorageResult};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::Arc;

pub const DEFAULT_RETRIEVAL_LIMIT: usize = 20;
pub const DEFAULT_EXCERPT_CHARS: usize = 500;

/// One note shortened for a synthesis prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextExcerpt {
    pub id: NoteId,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Content with line breaks flattened, capped in characters.
    pub excerpt: String,
}

/// Strategy selecting which notes back an answer.
pub trait Retriever: Send + Sync {
    /// Returns at most `limit` excerpts drawn from `tags`.
    fn retrieve(
        &self,
        query: &str,
        tags: &[String],
        limit: usize,
    ) -> StorageResult<Vec<ContextExcerpt>>;
}

/// Lists the selected tags and loads the newest notes.
///
/// Only the top `limit` summaries are loaded in full, so the cost of a
/// retrieval grows with the number of listed notes, not their size.
pub struct TagScanRetriever {
    store: Arc<dyn StorageBackend>,
    excerpt_chars: usize,
}

impl TagScanRetriever {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self {
            store,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }
}

impl Retriever for TagScanRetriever {
    fn retrieve(
        &self,
        _query: &str,
        tags: &[String],
        limit: usize,
    ) -> StorageResult<Vec<ContextExcerpt>> {
        let mut summaries: Vec<FileSummary> = Vec::new();
        for tag in tags {
            summaries.extend(self.store.list_files(tag)?);
        }
        let candidates = dedupe_summaries(summaries);

        let mut excerpts = Vec::new();
        for summary in candidates.into_iter().take(limit) {
            match self.store.load(&summary.tag, &summary.id.to_string()) {
                Ok(note) => excerpts.push(ContextExcerpt {
                    id: note.id,
                    excerpt: flatten_excerpt(&note.content, self.excerpt_chars),
                    title: note.title,
                    tags: note.tags,
                    created_at: note.created_at,
                }),
                Err(err) => {
                    warn!(
                        "event=context_load module=agent status=error error_kind={}",
                        err.kind()
                    );
                }
            }
        }

        debug!(
            "event=context_retrieve module=agent status=ok tag_count={} excerpt_count={}",
            tags.len(),
            excerpts.len()
        );
        Ok(excerpts)
    }
}

/// Joins lines with spaces and keeps the first `max_chars` characters.
pub fn flatten_excerpt(content: &str, max_chars: usize) -> String {
    content
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(max_chars)
        .collect()
}
