use chrono::{DateTime, TimeZone, Utc};
use flashmemo_core::journal::UpdateJournal;
use flashmemo_core::model::document::DocumentBlock;
use flashmemo_core::model::note::{Note, NoteType};
use flashmemo_core::storage::remote::{
    DocumentApi, EntryKind, RemoteEntry, RemoteError, RemoteResult,
};
use flashmemo_core::{ErrorKind, RemoteDocStore, StorageBackend, StorageError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const ROOT: &str = "root";

#[derive(Default)]
struct State {
    next: i64,
    /// token -> (parent, name)
    folders: BTreeMap<String, (String, String)>,
    /// token -> (folder, title, blocks, modified)
    documents: BTreeMap<String, (String, String, Vec<DocumentBlock>, i64)>,
    read_limits: Vec<Option<usize>>,
}

/// In-memory document service recording every read.
#[derive(Default)]
struct FakeDocs {
    state: Mutex<State>,
    fail_append: AtomicBool,
    fail_delete: AtomicBool,
}

impl FakeDocs {
    fn read_limits(&self) -> Vec<Option<usize>> {
        self.state.lock().unwrap().read_limits.clone()
    }

    fn reset_reads(&self) {
        self.state.lock().unwrap().read_limits.clear();
    }

    fn document_titles(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .documents
            .values()
            .map(|(folder, title, _, _)| format!("{}/{title}", state.folders[folder].1))
            .collect()
    }

    fn folder_count(&self) -> usize {
        self.state.lock().unwrap().folders.len()
    }

    fn add_unmanaged_document(&self, folder_name: &str, title: &str) {
        let mut state = self.state.lock().unwrap();
        let folder = state
            .folders
            .iter()
            .find(|(_, (_, name))| name == folder_name)
            .map(|(token, _)| token.clone())
            .unwrap();
        state.next += 1;
        let token = format!("doc-{}", state.next);
        let modified = state.next;
        state.documents.insert(
            token,
            (folder, title.to_string(), vec![DocumentBlock::Text("hello".to_string())], modified),
        );
    }
}

fn at(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

impl DocumentApi for FakeDocs {
    fn list_folder(&self, folder_token: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<RemoteEntry> = state
            .folders
            .iter()
            .filter(|(_, (parent, _))| parent == folder_token)
            .map(|(token, (_, name))| RemoteEntry {
                token: token.clone(),
                name: name.clone(),
                kind: EntryKind::Folder,
                modified_at: None,
            })
            .collect();
        entries.extend(
            state
                .documents
                .iter()
                .filter(|(_, (folder, ..))| folder == folder_token)
                .map(|(token, (_, title, _, modified))| RemoteEntry {
                    token: token.clone(),
                    name: title.clone(),
                    kind: EntryKind::Document,
                    modified_at: at(*modified),
                }),
        );
        Ok(entries)
    }

    fn create_folder(&self, parent_token: &str, name: &str) -> RemoteResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let token = format!("fld-{}", state.next);
        state
            .folders
            .insert(token.clone(), (parent_token.to_string(), name.to_string()));
        Ok(token)
    }

    fn create_document(&self, folder_token: &str, title: &str) -> RemoteResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let token = format!("doc-{}", state.next);
        let modified = state.next;
        state.documents.insert(
            token.clone(),
            (folder_token.to_string(), title.to_string(), Vec::new(), modified),
        );
        Ok(token)
    }

    fn append_blocks(&self, document: &str, blocks: &[DocumentBlock]) -> RemoteResult<()> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(RemoteError::Api {
                code: 1_770_001,
                message: "append rejected".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let modified = state.next;
        let entry = state
            .documents
            .get_mut(document)
            .ok_or_else(|| RemoteError::NotFound(document.to_string()))?;
        entry.2.extend(blocks.iter().cloned());
        entry.3 = modified;
        Ok(())
    }

    fn read_blocks(
        &self,
        document: &str,
        limit: Option<usize>,
    ) -> RemoteResult<Vec<DocumentBlock>> {
        let mut state = self.state.lock().unwrap();
        state.read_limits.push(limit);
        let blocks = &state
            .documents
            .get(document)
            .ok_or_else(|| RemoteError::NotFound(document.to_string()))?
            .2;
        Ok(match limit {
            Some(limit) => blocks.iter().take(limit).cloned().collect(),
            None => blocks.clone(),
        })
    }

    fn delete_document(&self, document: &str) -> RemoteResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RemoteError::Auth("permission denied".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .documents
            .remove(document)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(document.to_string()))
    }
}

fn store_with(api: &Arc<FakeDocs>) -> RemoteDocStore {
    let api: Arc<dyn DocumentApi> = api.clone();
    RemoteDocStore::new(api, ROOT)
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn save_and_load_roundtrip() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    let note = Note::new("Rust tips", "use ? for errors\nprefer iterators", tags(&["dev", "rust"]));
    store.save(&note).unwrap();

    assert_eq!(store.list_tags().unwrap(), tags(&["dev", "rust"]));
    assert_eq!(api.folder_count(), 1);
    assert_eq!(store.load("dev", &note.id.to_string()).unwrap(), note);
    assert_eq!(store.load("dev", "Rust tips").unwrap(), note);
}

#[test]
fn image_notes_store_an_image_block() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    let mut note = Note::new("Receipt", "img_v2_token", tags(&["finance"]));
    note.kind = NoteType::Image;
    store.save(&note).unwrap();

    let loaded = store.load("finance", "Receipt").unwrap();
    assert_eq!(loaded.kind, NoteType::Image);
    assert_eq!(loaded.content, "img_v2_token");
}

#[test]
fn listing_reads_only_the_meta_block_of_each_document() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    store
        .save(&Note::new("Short", "x", tags(&["log"])))
        .unwrap();
    store
        .save(&Note::new("Long", "y".repeat(200_000), tags(&["log"])))
        .unwrap();
    api.add_unmanaged_document("log", "Shared doc");
    api.reset_reads();

    let listed = store.list_files("log").unwrap();
    let names: Vec<&str> = listed.iter().map(|summary| summary.name.as_str()).collect();
    assert_eq!(names, vec!["Long", "Short"]);
    assert_eq!(api.read_limits(), vec![Some(1), Some(1), Some(1)]);
}

#[test]
fn unknown_tag_lists_nothing_and_creates_no_folder() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    assert!(store.list_files("nowhere").unwrap().is_empty());
    assert_eq!(api.folder_count(), 0);
    let err = store.load("nowhere", "anything").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn duplicate_title_is_a_conflict() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    store.save(&Note::new("Plan", "a", tags(&["work"]))).unwrap();
    let err = store
        .save(&Note::new("Plan", "b", tags(&["work"])))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(api.document_titles(), vec!["work/Plan".to_string()]);
}

#[test]
fn failed_append_rolls_back_the_new_document() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);
    api.fail_append.store(true, Ordering::SeqCst);

    let err = store
        .save(&Note::new("Lost", "body", tags(&["inbox"])))
        .unwrap_err();
    assert!(matches!(err, StorageError::Remote(RemoteError::Api { .. })));
    assert!(api.document_titles().is_empty());
}

#[test]
fn update_moves_document_between_folders() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    let mut note = Note::new("Idea", "first", tags(&["inbox"]));
    store.save(&note).unwrap();
    note.tags = tags(&["projects"]);
    note.content = "second".to_string();
    store.update(&note).unwrap();

    assert_eq!(api.document_titles(), vec!["projects/Idea".to_string()]);
    assert_eq!(store.load("projects", "Idea").unwrap().content, "second");
    assert!(store.list_files("inbox").unwrap().is_empty());
}

#[test]
fn failed_delete_is_a_partial_update_until_reconciled() {
    let api = Arc::new(FakeDocs::default());
    let journal = Arc::new(UpdateJournal::in_memory().unwrap());
    let store = store_with(&api).with_journal(Arc::clone(&journal));

    let mut note = Note::new("Essay", "v1", tags(&["drafts"]));
    store.save(&note).unwrap();
    note.content = "v2".to_string();
    note.tags = tags(&["published"]);

    api.fail_delete.store(true, Ordering::SeqCst);
    let err = store.update(&note).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialUpdate);
    assert!(err.kind().is_recoverable());
    let mut titles = api.document_titles();
    titles.sort();
    assert_eq!(titles, vec!["drafts/Essay".to_string(), "published/Essay".to_string()]);

    api.fail_delete.store(false, Ordering::SeqCst);
    let report = store.reconcile().unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(report.removed.len(), 1);
    assert_eq!(api.document_titles(), vec!["published/Essay".to_string()]);
    assert_eq!(store.load("published", "Essay").unwrap().content, "v2");
}

#[test]
fn secondary_tags_are_listed_and_loadable() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    let venv = Note::new("venv", "python -m venv .venv", tags(&["inbox", "python"]));
    store.save(&venv).unwrap();
    store
        .save(&Note::new("loops", "for x in xs", tags(&["python"])))
        .unwrap();

    assert_eq!(store.list_tags().unwrap(), tags(&["inbox", "python"]));
    let listed = store.list_files("python").unwrap();
    let mut found: Vec<(&str, &str)> = listed
        .iter()
        .map(|summary| (summary.name.as_str(), summary.tag.as_str()))
        .collect();
    found.sort();
    assert_eq!(found, vec![("loops", "python"), ("venv", "inbox")]);

    assert_eq!(store.load("inbox", &venv.id.to_string()).unwrap(), venv);
    assert_eq!(store.load("python", "venv").unwrap(), venv);
}

#[test]
fn names_clash_after_sanitizing_like_the_filesystem() {
    let api = Arc::new(FakeDocs::default());
    let store = store_with(&api);

    let slashed = Note::new("a/b", "first", tags(&["work"]));
    store.save(&slashed).unwrap();
    assert_eq!(api.document_titles(), vec!["work/a_b".to_string()]);

    let err = store
        .save(&Note::new("a_b", "second", tags(&["work"])))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let listed = store.list_files("work").unwrap();
    assert_eq!(listed[0].name, "a/b");
    assert_eq!(store.load("work", "a/b").unwrap(), slashed);
}
