//! Remote-document note store.
//!
//! # Responsibility
//! - Persist each note as one document inside a per-tag folder under a
//!   configured root folder.
//! - Lead every document with a JSON meta block so identity survives
//!   renames and moves made in the remote UI.
//!
//! # Invariants
//! - `list_files` reads one block per document, never the body.
//! - A document whose first block is not a meta block is not a note.
//! - `save` deletes the document it created when writing blocks fails.
//! - Documents are named with `sanitize_name(title)`, and name clashes are
//!   judged on that form, as on the filesystem.

use super::replace::{replace_note, ReplacePhase, ReplaceSteps};
use super::{
    carries_tag, dedupe_summaries, merge_tags, newest_first, sanitize_name, NoteKey,
    ReconcileReport, StorageBackend, StorageError, StorageResult,
};
use crate::codec::note_header::HEADER_TITLE;
use crate::codec::{
    decode_meta_block, encode_meta_block, header_note_id, header_tags, header_to_note,
    note_to_header, DecodeHints,
};
use crate::error::ErrorKind;
use crate::journal::UpdateJournal;
use crate::model::document::DocumentBlock;
use crate::model::note::{
    FileSummary, MetaValue, Metadata, Note, NoteId, NoteType, NoteValidationError,
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};
use std::time::Instant;

mod http;

pub use http::HttpDocumentApi;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug)]
pub enum RemoteError {
    Http(reqwest::Error),
    /// The service answered with a non-zero business code.
    Api { code: i64, message: String },
    /// Credentials were rejected or no access token could be obtained.
    Auth(String),
    /// A reply did not have the expected shape.
    InvalidResponse(String),
    NotFound(String),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Api { .. } | Self::Auth(_) => ErrorKind::Io,
            Self::InvalidResponse(_) => ErrorKind::InvalidData,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(err) => write!(f, "remote request failed: {err}"),
            Self::Api { code, message } => write!(f, "remote api error {code}: {message}"),
            Self::Auth(message) => write!(f, "remote authentication failed: {message}"),
            Self::InvalidResponse(message) => write!(f, "unexpected remote reply: {message}"),
            Self::NotFound(token) => write!(f, "remote entry `{token}` not found"),
        }
    }
}

impl Error for RemoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    Document,
    Other,
}

/// One child of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub token: String,
    pub name: String,
    pub kind: EntryKind,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Transport to a folder/document service.
pub trait DocumentApi: Send + Sync {
    fn list_folder(&self, folder_token: &str) -> RemoteResult<Vec<RemoteEntry>>;
    /// Creates a sub-folder and returns its token.
    fn create_folder(&self, parent_token: &str, name: &str) -> RemoteResult<String>;
    /// Creates an empty document and returns its token.
    fn create_document(&self, folder_token: &str, title: &str) -> RemoteResult<String>;
    fn append_blocks(&self, document: &str, blocks: &[DocumentBlock]) -> RemoteResult<()>;
    /// Reads content blocks in order; `limit` caps how many are fetched.
    fn read_blocks(&self, document: &str, limit: Option<usize>)
        -> RemoteResult<Vec<DocumentBlock>>;
    fn delete_document(&self, document: &str) -> RemoteResult<()>;
}

/// Managed document discovered by a meta-block scan.
#[derive(Debug, Clone)]
struct RemoteArtifact {
    token: String,
    /// Title from the meta block, or the document name when it has none.
    name: String,
    /// Document name as shown in the remote UI.
    document_name: String,
    /// Name of the folder holding the document.
    folder: String,
    id: NoteId,
    tags: Vec<String>,
    modified_at: Option<DateTime<Utc>>,
}

impl RemoteArtifact {
    /// Same rule as the filesystem: meta title or sanitized file name.
    fn is_named(&self, name: &str) -> bool {
        self.name == name || sanitize_name(&self.document_name) == sanitize_name(name)
    }

    fn matches(&self, key: &NoteKey, raw: &str) -> bool {
        match key {
            NoteKey::Id(id) => self.id == *id || self.is_named(raw),
            NoteKey::Name(name) => self.is_named(name),
        }
    }

    fn summary(self, tag: String) -> FileSummary {
        FileSummary {
            id: self.id,
            name: self.name,
            tag,
            modified_at: self.modified_at,
        }
    }
}

pub struct RemoteDocStore {
    api: Arc<dyn DocumentApi>,
    root_token: String,
    /// Folder name -> folder token.
    folders: RwLock<HashMap<String, String>>,
    journal: Option<Arc<UpdateJournal>>,
}

impl RemoteDocStore {
    pub fn new(api: Arc<dyn DocumentApi>, root_token: impl Into<String>) -> Self {
        Self {
            api,
            root_token: root_token.into(),
            folders: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Attaches the journal that records in-flight updates.
    pub fn with_journal(mut self, journal: Arc<UpdateJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn cached_folder(&self, name: &str) -> Option<String> {
        self.folders
            .read()
            .ok()
            .and_then(|folders| folders.get(name).cloned())
    }

    /// Re-reads the root folder and replaces the folder cache.
    fn refresh_folders(&self) -> StorageResult<Vec<(String, String)>> {
        let mut folders: Vec<(String, String)> = self
            .api
            .list_folder(&self.root_token)?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Folder && !entry.name.starts_with('.'))
            .map(|entry| (entry.name, entry.token))
            .collect();
        folders.sort();

        if let Ok(mut cache) = self.folders.write() {
            cache.clear();
            cache.extend(folders.iter().cloned());
        }
        Ok(folders)
    }

    /// Resolves the folder of `tag`, creating it when `create` is set.
    fn folder_for(&self, tag: &str, create: bool) -> StorageResult<Option<String>> {
        let name = sanitize_name(tag);
        if let Some(token) = self.cached_folder(&name) {
            return Ok(Some(token));
        }
        if let Some((_, token)) = self
            .refresh_folders()?
            .into_iter()
            .find(|(folder, _)| *folder == name)
        {
            return Ok(Some(token));
        }
        if !create {
            return Ok(None);
        }

        let token = self.api.create_folder(&self.root_token, &name)?;
        info!("event=folder_create module=storage backend=remote status=ok");
        if let Ok(mut cache) = self.folders.write() {
            cache.insert(name, token.clone());
        }
        Ok(Some(token))
    }

    /// Reads the meta block of every document in a folder.
    fn scan_folder(
        &self,
        folder: &str,
        folder_token: &str,
    ) -> StorageResult<Vec<RemoteArtifact>> {
        let mut artifacts = Vec::new();
        for entry in self.api.list_folder(folder_token)? {
            if entry.kind != EntryKind::Document {
                continue;
            }
            let first = match self.api.read_blocks(&entry.token, Some(1)) {
                Ok(blocks) => blocks.into_iter().next(),
                Err(err) => {
                    warn!(
                        "event=note_scan module=storage backend=remote status=error error_kind={}",
                        err.kind()
                    );
                    continue;
                }
            };
            let meta = first
                .as_ref()
                .map(decode_meta_block)
                .transpose()
                .ok()
                .flatten()
                .flatten();
            let Some((meta, id)) =
                meta.and_then(|meta| header_note_id(&meta).ok().map(|id| (meta, id)))
            else {
                continue;
            };
            artifacts.push(RemoteArtifact {
                token: entry.token,
                name: meta_title(&meta).unwrap_or_else(|| entry.name.clone()),
                document_name: entry.name,
                folder: folder.to_string(),
                id,
                tags: header_tags(&meta),
                modified_at: entry.modified_at,
            });
        }
        Ok(artifacts)
    }

    fn scan_all(&self) -> StorageResult<Vec<RemoteArtifact>> {
        let mut all = Vec::new();
        for (name, folder) in self.refresh_folders()? {
            all.extend(self.scan_folder(&name, &folder)?);
        }
        Ok(all)
    }

    /// Documents outside `tag`'s own folder whose meta block lists `tag`.
    fn secondary_artifacts(&self, tag: &str) -> StorageResult<Vec<RemoteArtifact>> {
        let own = sanitize_name(tag);
        let mut found = Vec::new();
        for (name, folder) in self.refresh_folders()? {
            if name == own {
                continue;
            }
            found.extend(
                self.scan_folder(&name, &folder)?
                    .into_iter()
                    .filter(|artifact| carries_tag(&artifact.tags, tag)),
            );
        }
        Ok(found)
    }

    /// Reads a whole document and rebuilds its note.
    fn fetch_note(&self, token: &str, name: &str, tag: &str) -> StorageResult<Note> {
        let blocks = self.api.read_blocks(token, None)?;
        let mut blocks = blocks.into_iter();
        let meta = blocks
            .next()
            .map(|block| decode_meta_block(&block))
            .transpose()
            .map_err(|err| StorageError::codec(token, err))?
            .flatten()
            .ok_or_else(|| StorageError::not_found(Some(tag), name))?;

        let rest: Vec<DocumentBlock> = blocks.collect();
        let body = rest
            .iter()
            .filter_map(DocumentBlock::plain_text)
            .collect::<Vec<_>>()
            .join("\n");
        let mut note = header_to_note(meta, body, DecodeHints { name, tag })
            .map_err(|err| StorageError::codec(token, err))?;

        if note.kind == NoteType::Image {
            let image = rest.iter().find_map(|block| match block {
                DocumentBlock::Image { reference } => Some(reference.clone()),
                _ => None,
            });
            if let Some(reference) = image {
                note.content = reference;
            }
        }
        Ok(note)
    }


    fn note_blocks(note: &Note) -> StorageResult<Vec<DocumentBlock>> {
        let meta = encode_meta_block(&note_to_header(note))
            .map_err(|err| StorageError::codec(note.title.as_str(), err))?;
        let body = match note.kind {
            NoteType::Image => DocumentBlock::Image {
                reference: note.content.clone(),
            },
            NoteType::Text | NoteType::Audio => DocumentBlock::Text(note.content.clone()),
        };
        Ok(vec![meta, body])
    }

    /// Creates one document holding `note` inside `folder`.
    ///
    /// Deletes the document again when its blocks cannot be written.
    fn create_note_document(&self, folder: &str, note: &Note) -> StorageResult<String> {
        let blocks = Self::note_blocks(note)?;
        let document = self.api.create_document(folder, &sanitize_name(&note.title))?;
        if let Err(err) = self.api.append_blocks(&document, &blocks) {
            if let Err(rollback) = self.api.delete_document(&document) {
                warn!(
                    "event=note_rollback module=storage backend=remote status=error error_kind={}",
                    rollback.kind()
                );
            }
            return Err(err.into());
        }
        Ok(document)
    }

    /// Rejects a title already used by another note in the folder.
    fn ensure_name_free(
        &self,
        folder: &(String, String),
        note: &Note,
        previous: Option<&str>,
    ) -> StorageResult<()> {
        let wanted = sanitize_name(&note.title);
        let clash = self.scan_folder(&folder.0, &folder.1)?.into_iter().any(|artifact| {
            sanitize_name(&artifact.document_name) == wanted
                && artifact.id != note.id
                && Some(artifact.token.as_str()) != previous
        });
        if clash {
            return Err(StorageError::Conflict {
                tag: note.primary_tag().unwrap_or_default().to_string(),
                name: note.title.clone(),
            });
        }
        Ok(())
    }

    /// Name and token of the folder for the note's primary tag.
    fn primary_folder(&self, note: &Note) -> StorageResult<(String, String)> {
        let tag = note
            .primary_tag()
            .ok_or(NoteValidationError::MissingPrimaryTag)?;
        let token = self
            .folder_for(tag, true)?
            .ok_or_else(|| StorageError::not_found(None, tag))?;
        Ok((sanitize_name(tag), token))
    }

    fn id_at(&self, token: &str) -> Option<NoteId> {
        let blocks = self.api.read_blocks(token, Some(1)).ok()?;
        let meta = decode_meta_block(blocks.first()?).ok()??;
        header_note_id(&meta).ok()
    }

    fn journal_scope(&self) -> String {
        format!("remote:{}", self.root_token)
    }
}

impl ReplaceSteps for RemoteDocStore {
    fn scope(&self) -> String {
        self.journal_scope()
    }

    fn locate(&self, note_id: NoteId) -> StorageResult<String> {
        newest(
            self.scan_all()?
                .into_iter()
                .filter(|artifact| artifact.id == note_id),
        )
        .map(|artifact| artifact.token)
        .ok_or_else(|| StorageError::not_found(None, note_id.to_string()))
    }

    fn create_replacement(&self, note: &Note, previous: &str) -> StorageResult<String> {
        let folder = self.primary_folder(note)?;
        self.ensure_name_free(&folder, note, Some(previous))?;
        self.create_note_document(&folder.1, note)
    }

    fn remove(&self, location: &str) -> StorageResult<()> {
        match self.api.delete_document(location) {
            Ok(()) | Err(RemoteError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl StorageBackend for RemoteDocStore {
    fn save(&self, note: &Note) -> StorageResult<NoteId> {
        note.validate()?;
        let started_at = Instant::now();
        let folder = self.primary_folder(note)?;
        self.ensure_name_free(&folder, note, None)?;
        self.create_note_document(&folder.1, note)?;
        info!(
            "event=note_save module=storage backend=remote status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(note.id)
    }

    fn load(&self, tag: &str, name_or_id: &str) -> StorageResult<Note> {
        let raw = name_or_id.trim();
        let key = NoteKey::parse(raw);
        let own = match self.folder_for(tag, false)? {
            Some(folder) => self.scan_folder(&sanitize_name(tag), &folder)?,
            None => Vec::new(),
        };

        // An id match wins over a name match inside the tag's own folder.
        let in_folder = match &key {
            NoteKey::Id(id) => newest(own.iter().filter(|a| a.id == *id).cloned())
                .or_else(|| newest(own.iter().filter(|a| a.is_named(raw)).cloned())),
            NoteKey::Name(name) => newest(own.iter().filter(|a| a.is_named(name)).cloned()),
        };
        if let Some(artifact) = in_folder {
            return self.fetch_note(&artifact.token, &artifact.document_name, tag);
        }

        let found = newest(
            self.secondary_artifacts(tag)?
                .into_iter()
                .filter(|artifact| artifact.matches(&key, raw)),
        );
        match found {
            Some(artifact) => {
                self.fetch_note(&artifact.token, &artifact.document_name, &artifact.folder)
            }
            None => Err(StorageError::not_found(Some(tag), raw)),
        }
    }

    fn list_files(&self, tag: &str) -> StorageResult<Vec<FileSummary>> {
        let mut summaries: Vec<FileSummary> = match self.folder_for(tag, false)? {
            Some(folder) => self
                .scan_folder(&sanitize_name(tag), &folder)?
                .into_iter()
                .map(|artifact| artifact.summary(tag.to_string()))
                .collect(),
            None => Vec::new(),
        };
        summaries.extend(self.secondary_artifacts(tag)?.into_iter().map(|artifact| {
            let folder = artifact.folder.clone();
            artifact.summary(folder)
        }));
        Ok(dedupe_summaries(summaries))
    }

    fn update(&self, note: &Note) -> StorageResult<NoteId> {
        replace_note(self, self.journal.as_deref(), note)
    }

    fn list_tags(&self) -> StorageResult<Vec<String>> {
        let artifacts = self.scan_all()?;
        let folders = self.refresh_folders()?.into_iter().map(|(name, _)| name);
        Ok(merge_tags(
            folders,
            artifacts.iter().map(|artifact| artifact.tags.as_slice()),
        ))
    }

    fn reconcile(&self) -> StorageResult<ReconcileReport> {
        let started_at = Instant::now();
        let mut report = ReconcileReport::default();

        if let Some(journal) = &self.journal {
            for entry in journal.open_entries(&self.journal_scope())? {
                let new_is_live = entry.phase == ReplacePhase::NewCreated
                    && entry
                        .new_location
                        .as_deref()
                        .is_some_and(|new| self.id_at(new) == Some(entry.note_id));
                if new_is_live && self.id_at(&entry.old_location) == Some(entry.note_id) {
                    match self.remove(&entry.old_location) {
                        Ok(()) => report.removed.push(entry.old_location.clone()),
                        Err(err) => {
                            report.failures.push(err.to_string());
                            continue;
                        }
                    }
                }
                journal.finish(entry.entry_id)?;
                report.resumed += 1;
            }
        }

        let mut by_id: HashMap<NoteId, Vec<RemoteArtifact>> = HashMap::new();
        for artifact in self.scan_all()? {
            by_id.entry(artifact.id).or_default().push(artifact);
        }
        for (_, mut artifacts) in by_id {
            if artifacts.len() < 2 {
                continue;
            }
            artifacts.sort_by(|a, b| {
                newest_first(
                    (a.modified_at, a.token.as_str()),
                    (b.modified_at, b.token.as_str()),
                )
            });
            for stale in artifacts.into_iter().skip(1) {
                match self.remove(&stale.token) {
                    Ok(()) => report.removed.push(stale.token),
                    Err(err) => report.failures.push(err.to_string()),
                }
            }
        }

        info!(
            "event=store_reconcile module=storage backend=remote status=ok resumed={} removed={} failures={} duration_ms={}",
            report.resumed,
            report.removed.len(),
            report.failures.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }
}

fn newest(artifacts: impl Iterator<Item = RemoteArtifact>) -> Option<RemoteArtifact> {
    artifacts.min_by(|a, b| {
        newest_first(
            (a.modified_at, a.token.as_str()),
            (b.modified_at, b.token.as_str()),
        )
    })
}

fn meta_title(meta: &Metadata) -> Option<String> {
    meta.get(HEADER_TITLE)
        .and_then(MetaValue::as_text)
        .filter(|title| !title.trim().is_empty())
        .map(str::to_string)
}
