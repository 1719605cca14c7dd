//! Prompt templates used by the retrieval router.
//!
//! # Responsibility
//! - Load user-editable `*.txt` templates from the prompts directory.
//! - Supply built-in defaults for every template the router needs.
//! - Render `{placeholder}` substitutions in one pass.
//!
//! # Invariants
//! - A missing or empty template file falls back to the built-in default.
//! - Substituted values are never re-scanned for placeholders.

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

pub const ROUTER_PROMPT: &str = "rag_router";
pub const SUMMARY_PROMPT: &str = "rag_summary";
pub const CHAT_SYSTEM_PROMPT: &str = "chat_system";

const TEMPLATE_EXTENSION: &str = "txt";

const DEFAULT_ROUTER: &str = r#"You route questions to a personal note collection.
Known tags: {all_tags}
Question: {query}

Reply with one JSON object and nothing else:
{"mode": "search" | "chat", "tags": ["tag", ...]}
Use "search" when the user wants to find or list notes and "chat" when they want an answer.
Only pick tags from the known list that are likely to hold relevant notes."#;

const DEFAULT_SUMMARY: &str = r#"Answer the question using the notes below. Cite notes by their number.
If the notes do not contain the answer, say so plainly.

Notes:
{context}

Question: {query}"#;

const DEFAULT_CHAT_SYSTEM: &str =
    "You are a concise assistant helping the user think through their notes.";

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

fn builtin(name: &str) -> Option<&'static str> {
    match name {
        ROUTER_PROMPT => Some(DEFAULT_ROUTER),
        SUMMARY_PROMPT => Some(DEFAULT_SUMMARY),
        CHAT_SYSTEM_PROMPT => Some(DEFAULT_CHAT_SYSTEM),
        _ => None,
    }
}

/// Named prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: BTreeMap<String, String>,
}

impl PromptLibrary {
    /// Library holding only the built-in defaults.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Reads every non-empty `*.txt` file in `dir`, keyed by file stem.
    ///
    /// Unreadable files are logged and skipped; a missing directory yields
    /// the built-in defaults.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut library = Self::default();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("event=prompts_load module=prompts status=error error={err}");
                }
                return library;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    library
                        .templates
                        .insert(name.to_string(), text.trim().to_string());
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("event=prompts_load module=prompts status=error name={name} error={err}");
                }
            }
        }

        info!(
            "event=prompts_load module=prompts status=ok count={}",
            library.templates.len()
        );
        library
    }

    /// Creates `dir` with the default templates when it does not exist yet.
    pub fn ensure_defaults(dir: impl AsRef<Path>) -> io::Result<()> {
        let dir = dir.as_ref();
        if dir.exists() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        for name in [ROUTER_PROMPT, SUMMARY_PROMPT] {
            if let Some(text) = builtin(name) {
                fs::write(dir.join(format!("{name}.{TEMPLATE_EXTENSION}")), text)?;
            }
        }
        Ok(())
    }

    pub fn with_template(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(name.into(), text.into());
        self
    }

    /// Loaded template, falling back to the built-in default.
    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates
            .get(name)
            .map(String::as_str)
            .or_else(|| builtin(name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        for name in [ROUTER_PROMPT, SUMMARY_PROMPT, CHAT_SYSTEM_PROMPT] {
            if !self.templates.contains_key(name) {
                names.push(name.to_string());
            }
        }
        names.sort();
        names
    }
}

/// Replaces `{name}` placeholders with values. Unknown placeholders stay.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{render, PromptLibrary, ROUTER_PROMPT, SUMMARY_PROMPT};
    use std::fs;

    #[test]
    fn render_substitutes_once_and_keeps_unknown_placeholders() {
        let rendered = render(
            "Q: {query} / ctx: {context} / {other}",
            &[("query", "what is {context}?"), ("context", "notes")],
        );
        assert_eq!(rendered, "Q: what is {context}? / ctx: notes / {other}");
    }

    #[test]
    fn router_default_keeps_json_braces() {
        let library = PromptLibrary::builtin();
        let rendered = render(
            library.template(ROUTER_PROMPT).unwrap(),
            &[("query", "q"), ("all_tags", "[a, b]")],
        );
        assert!(rendered.contains("Known tags: [a, b]"));
        assert!(rendered.contains(r#"{"mode": "search" | "chat""#));
    }

    #[test]
    fn files_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rag_summary.txt"), "  custom {query}\n").unwrap();
        fs::write(dir.path().join("empty.txt"), "   ").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let library = PromptLibrary::load(dir.path());
        assert_eq!(library.template(SUMMARY_PROMPT), Some("custom {query}"));
        assert!(library.template(ROUTER_PROMPT).is_some());
        assert_eq!(library.template("empty"), None);
        assert_eq!(library.template("notes"), None);
    }

    #[test]
    fn ensure_defaults_writes_templates_once() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        PromptLibrary::ensure_defaults(&prompts).unwrap();
        assert!(prompts.join("rag_router.txt").is_file());
        assert!(prompts.join("rag_summary.txt").is_file());

        fs::write(prompts.join("rag_router.txt"), "mine").unwrap();
        PromptLibrary::ensure_defaults(&prompts).unwrap();
        assert_eq!(fs::read_to_string(prompts.join("rag_router.txt")).unwrap(), "mine");
    }
}
