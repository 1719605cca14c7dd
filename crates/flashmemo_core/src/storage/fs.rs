//! Filesystem note store.
//!
//! # Responsibility
//! - Persist each note as `<root>/<primary tag>/<title>.md` with a header
//!   block followed by the body.
//! - Answer listings from header lines only.
//! - Resolve secondary tags from headers, so a note is listed and loadable
//!   under each of its tags.
//!
//! # Invariants
//! - Writes go through a hidden temp file renamed into place, so a reader
//!   never observes a half-written note.
//! - Hidden entries (leading `.`) are never treated as tags or notes.
//! - Secondary tags live only in the header; they never create copies or
//!   directories.

use super::replace::{replace_note, ReplacePhase, ReplaceSteps};
use super::{
    carries_tag, dedupe_summaries, merge_tags, newest_first, sanitize_name, NoteKey,
    ReconcileReport, StorageBackend, StorageError, StorageResult,
};
use crate::codec::front_matter::is_fence;
use crate::codec::note_header::{HEADER_ID, HEADER_TITLE};
use crate::codec::{
    decode_header, encode_header, header_note_id, header_tags, header_to_note, join_document,
    note_to_header, split_document, CodecError, DecodeHints,
};
use crate::journal::UpdateJournal;
use crate::model::note::{
    FileSummary, MetaValue, Metadata, Note, NoteId, NoteType, NoteValidationError,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const NOTE_EXTENSION: &str = "md";
const TEMP_FILE_PREFIX: &str = ".flashmemo-";
/// Header key holding the reference of an image note.
const IMAGE_HEADER_KEY: &str = "image";

/// One note file discovered by a header scan.
#[derive(Debug, Clone)]
struct Artifact {
    /// Root-relative path with `/` separators.
    location: String,
    path: PathBuf,
    /// Name of the tag directory holding the file.
    folder: String,
    id: NoteId,
    name: String,
    tags: Vec<String>,
    modified_at: Option<DateTime<Utc>>,
}

impl Artifact {
    fn matches(&self, key: &NoteKey, raw: &str) -> bool {
        match key {
            NoteKey::Id(id) => self.id == *id || self.name == raw,
            NoteKey::Name(name) => self.name == *name,
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

/// Markdown-with-header store rooted at one directory.
pub struct FsNoteStore {
    root: PathBuf,
    journal: Option<Arc<UpdateJournal>>,
}

impl FsNoteStore {
    /// Opens a store, creating `root` when missing.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|err| StorageError::io(format!("create `{}`", root.display()), err))?;
        info!(
            "event=store_open module=storage backend=fs status=ok root={}",
            root.display()
        );
        Ok(Self {
            root,
            journal: None,
        })
    }

    /// Attaches the journal that records in-flight updates.
    pub fn with_journal(mut self, journal: Arc<UpdateJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative location a note would be written to.
    pub fn location_for(&self, note: &Note) -> StorageResult<String> {
        let tag = note
            .primary_tag()
            .ok_or(NoteValidationError::MissingPrimaryTag)?;
        Ok(format!(
            "{}/{}.{NOTE_EXTENSION}",
            sanitize_name(tag),
            sanitize_name(&note.title)
        ))
    }

    fn absolute(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn render(&self, note: &Note, location: &str) -> StorageResult<String> {
        let mut header = note_to_header(note);
        let body = if note.kind == NoteType::Image {
            header.insert(
                IMAGE_HEADER_KEY.to_string(),
                MetaValue::Text(note.content.clone()),
            );
            image_markdown(&note.content)
        } else {
            note.content.clone()
        };
        let header = encode_header(&header).map_err(|err| StorageError::codec(location, err))?;
        Ok(join_document(&header, &body))
    }

    fn parse_file(&self, path: &Path, tag: &str) -> StorageResult<Note> {
        let location = self.relative(path);
        let text = fs::read_to_string(path)
            .map_err(|err| StorageError::io(format!("read `{location}`"), err))?;
        let (header, body) = split_document(&text);
        let header = header.ok_or_else(|| {
            StorageError::codec(location.as_str(), CodecError::MissingField(HEADER_ID))
        })?;
        let mut header =
            decode_header(header).map_err(|err| StorageError::codec(location.as_str(), err))?;
        let image_ref = header.remove(IMAGE_HEADER_KEY);

        let name = file_stem(path);
        let mut note = header_to_note(
            header,
            body.to_string(),
            DecodeHints {
                name: &name,
                tag,
            },
        )
        .map_err(|err| StorageError::codec(location.as_str(), err))?;

        if note.kind == NoteType::Image {
            if let Some(MetaValue::Text(reference)) = image_ref {
                note.content = reference;
            }
        }
        Ok(note)
    }

    /// Writes `text` to `path` through a hidden temp file in the same directory.
    fn write_atomically(&self, path: &Path, text: &str, overwrite: bool) -> io::Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(".tmp")
            .tempfile_in(dir)?;
        temp.write_all(text.as_bytes())?;
        temp.as_file().sync_all()?;
        if overwrite {
            temp.persist(path).map_err(|err| err.error)?;
        } else {
            temp.persist_noclobber(path).map_err(|err| err.error)?;
        }
        Ok(())
    }

    fn tag_dirs(&self) -> StorageResult<Vec<(String, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StorageError::io(
                    format!("list `{}`", self.root.display()),
                    err,
                ))
            }
        };

        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                dirs.push((name, entry.path()));
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Reads the header of every note file directly under `dir`.
    ///
    /// Files without a managed header are skipped, so foreign markdown in a
    /// tag directory never breaks a listing.
    fn scan_dir(&self, dir: &Path) -> StorageResult<Vec<Artifact>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StorageError::io(
                    format!("list `{}`", self.relative(dir)),
                    err,
                ))
            }
        };

        let folder = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut artifacts = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_note_file(&path) || !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let location = self.relative(&path);
            let header = match read_header_block(&path) {
                Ok(Some(block)) => block,
                Ok(None) => {
                    debug!("event=note_scan module=storage status=skip reason=no_header location={location}");
                    continue;
                }
                Err(err) => {
                    warn!("event=note_scan module=storage status=error location={location} error={err}");
                    continue;
                }
            };
            let decoded = decode_header(&header).and_then(|meta| {
                header_note_id(&meta).map(|id| (id, header_title(&meta), header_tags(&meta)))
            });
            let (id, title, tags) = match decoded {
                Ok(parts) => parts,
                Err(err) => {
                    warn!("event=note_scan module=storage status=error location={location} error={err}");
                    continue;
                }
            };

            artifacts.push(Artifact {
                name: title.unwrap_or_else(|| file_stem(&path)),
                modified_at: entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .ok()
                    .map(DateTime::<Utc>::from),
                location,
                path,
                folder: folder.clone(),
                id,
                tags,
            });
        }
        Ok(artifacts)
    }

    fn scan_all(&self) -> StorageResult<Vec<Artifact>> {
        let mut all = Vec::new();
        for (_, dir) in self.tag_dirs()? {
            all.extend(self.scan_dir(&dir)?);
        }
        Ok(all)
    }

    /// Notes outside `tag`'s own directory whose header lists `tag`.
    fn secondary_artifacts(&self, tag: &str) -> StorageResult<Vec<Artifact>> {
        let own = sanitize_name(tag);
        let mut found = Vec::new();
        for (name, dir) in self.tag_dirs()? {
            if name == own {
                continue;
            }
            found.extend(
                self.scan_dir(&dir)?
                    .into_iter()
                    .filter(|artifact| carries_tag(&artifact.tags, tag)),
            );
        }
        Ok(found)
    }

    /// Loads from the directory of `tag` only.
    fn load_from_folder(&self, tag: &str, key: &NoteKey, raw: &str) -> StorageResult<Note> {
        match key {
            NoteKey::Id(id) => {
                let dir = self.root.join(sanitize_name(tag));
                let found = newest(
                    self.scan_dir(&dir)?
                        .into_iter()
                        .filter(|artifact| artifact.id == *id),
                );
                match found {
                    Some(artifact) => self.parse_file(&artifact.path, tag),
                    None => self.load_by_name(tag, raw),
                }
            }
            NoteKey::Name(name) => self.load_by_name(tag, name),
        }
    }

    fn load_by_name(&self, tag: &str, name: &str) -> StorageResult<Note> {
        let dir = self.root.join(sanitize_name(tag));
        let direct = dir.join(format!("{}.{NOTE_EXTENSION}", sanitize_name(name)));
        if direct.is_file() {
            return self.parse_file(&direct, tag);
        }

        let found = newest(
            self.scan_dir(&dir)?
                .into_iter()
                .filter(|artifact| artifact.name == name),
        );
        match found {
            Some(artifact) => self.parse_file(&artifact.path, tag),
            None => Err(StorageError::not_found(Some(tag), name)),
        }
    }

    /// Id stored in the header at `location`, when the file is a managed note.
    fn id_at(&self, location: &str) -> Option<NoteId> {
        let block = read_header_block(&self.absolute(location)).ok()??;
        decode_header(&block)
            .ok()
            .and_then(|meta| header_note_id(&meta).ok())
    }

    fn journal_scope(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}

impl ReplaceSteps for FsNoteStore {
    fn scope(&self) -> String {
        self.journal_scope()
    }

    fn locate(&self, note_id: NoteId) -> StorageResult<String> {
        newest(
            self.scan_all()?
                .into_iter()
                .filter(|artifact| artifact.id == note_id),
        )
        .map(|artifact| artifact.location)
        .ok_or_else(|| StorageError::not_found(None, note_id.to_string()))
    }

    fn create_replacement(&self, note: &Note, previous: &str) -> StorageResult<String> {
        let location = self.location_for(note)?;
        let path = self.absolute(&location);
        let text = self.render(note, &location)?;

        let in_place = location == previous || self.id_at(&location) == Some(note.id);
        let result = self.write_atomically(&path, &text, in_place);
        match result {
            Ok(()) => Ok(location),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(StorageError::Conflict {
                tag: note.primary_tag().unwrap_or_default().to_string(),
                name: note.title.clone(),
            }),
            Err(err) => Err(StorageError::io(format!("write `{location}`"), err)),
        }
    }

    fn remove(&self, location: &str) -> StorageResult<()> {
        match fs::remove_file(self.absolute(location)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(format!("remove `{location}`"), err)),
        }
    }
}

impl StorageBackend for FsNoteStore {
    fn save(&self, note: &Note) -> StorageResult<NoteId> {
        note.validate()?;
        let started_at = Instant::now();
        let location = self.location_for(note)?;
        let text = self.render(note, &location)?;

        match self.write_atomically(&self.absolute(&location), &text, false) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                info!("event=note_save module=storage backend=fs status=conflict");
                return Err(StorageError::Conflict {
                    tag: note.primary_tag().unwrap_or_default().to_string(),
                    name: note.title.clone(),
                });
            }
            Err(err) => return Err(StorageError::io(format!("write `{location}`"), err)),
        }

        info!(
            "event=note_save module=storage backend=fs status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(note.id)
    }

    fn load(&self, tag: &str, name_or_id: &str) -> StorageResult<Note> {
        let key = NoteKey::parse(name_or_id);
        match self.load_from_folder(tag, &key, name_or_id) {
            Err(StorageError::NotFound { .. }) => {}
            loaded => return loaded,
        }

        let raw = name_or_id.trim();
        let found = newest(
            self.secondary_artifacts(tag)?
                .into_iter()
                .filter(|artifact| artifact.matches(&key, raw)),
        );
        match found {
            Some(artifact) => self.parse_file(&artifact.path, &artifact.folder),
            None => Err(StorageError::not_found(Some(tag), raw)),
        }
    }

    fn list_files(&self, tag: &str) -> StorageResult<Vec<FileSummary>> {
        let started_at = Instant::now();
        let dir = self.root.join(sanitize_name(tag));
        let mut summaries: Vec<FileSummary> = self
            .scan_dir(&dir)?
            .into_iter()
            .map(|artifact| artifact.summary(tag.to_string()))
            .collect();
        summaries.extend(self.secondary_artifacts(tag)?.into_iter().map(|artifact| {
            let folder = artifact.folder.clone();
            artifact.summary(folder)
        }));
        let summaries = dedupe_summaries(summaries);
        debug!(
            "event=note_list module=storage backend=fs status=ok count={} duration_ms={}",
            summaries.len(),
            started_at.elapsed().as_millis()
        );
        Ok(summaries)
    }

    fn update(&self, note: &Note) -> StorageResult<NoteId> {
        replace_note(self, self.journal.as_deref(), note)
    }

    fn list_tags(&self) -> StorageResult<Vec<String>> {
        let artifacts = self.scan_all()?;
        let folders = self.tag_dirs()?.into_iter().map(|(name, _)| name);
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
                let finished_elsewhere = entry.phase == ReplacePhase::NewCreated
                    && entry
                        .new_location
                        .as_deref()
                        .is_some_and(|new| new != entry.old_location && self.absolute(new).is_file());
                if finished_elsewhere && self.id_at(&entry.old_location) == Some(entry.note_id) {
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

        let mut by_id: HashMap<NoteId, Vec<Artifact>> = HashMap::new();
        for artifact in self.scan_all()? {
            by_id.entry(artifact.id).or_default().push(artifact);
        }
        for (_, mut artifacts) in by_id {
            if artifacts.len() < 2 {
                continue;
            }
            artifacts.sort_by(|a, b| {
                newest_first(
                    (a.modified_at, a.location.as_str()),
                    (b.modified_at, b.location.as_str()),
                )
            });
            for stale in artifacts.into_iter().skip(1) {
                match self.remove(&stale.location) {
                    Ok(()) => report.removed.push(stale.location),
                    Err(err) => report.failures.push(err.to_string()),
                }
            }
        }

        info!(
            "event=store_reconcile module=storage backend=fs status=ok resumed={} removed={} failures={} duration_ms={}",
            report.resumed,
            report.removed.len(),
            report.failures.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }
}

fn newest(artifacts: impl Iterator<Item = Artifact>) -> Option<Artifact> {
    artifacts.min_by(|a, b| {
        newest_first(
            (a.modified_at, a.location.as_str()),
            (b.modified_at, b.location.as_str()),
        )
    })
}

fn is_note_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden && path.extension().is_some_and(|ext| ext == NOTE_EXTENSION)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn header_title(header: &Metadata) -> Option<String> {
    header
        .get(HEADER_TITLE)
        .and_then(MetaValue::as_text)
        .filter(|title| !title.trim().is_empty())
        .map(str::to_string)
}

/// Markdown shown in the body of an image note.
fn image_markdown(reference: &str) -> String {
    let plain = !reference.is_empty()
        && !reference
            .chars()
            .any(|c| c.is_whitespace() || c == '(' || c == ')');
    if plain {
        format!("![image]({reference})")
    } else {
        reference.to_string()
    }
}

/// Reads only the header lines of a note file.
///
/// Returns `Ok(None)` when the file does not start with a fence or the
/// closing fence is missing.
fn read_header_block(path: &Path) -> io::Result<Option<String>> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let visible = line.trim_start_matches('\u{feff}');
        if !visible.trim_end_matches(['\r', '\n']).is_empty() {
            if !is_fence(visible) {
                return Ok(None);
            }
            break;
        }
    }

    let mut block = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if is_fence(&line) {
            return Ok(Some(block));
        }
        block.push_str(&line);
    }
}
