//! Intent classification for incoming queries.
//!
//! One model call decides whether the user wants a listing (`search`) or a
//! synthesized answer (`chat`), and which tags are worth scanning.
//!
//! Accepted reply shapes, most specific first:
//!
//! ```text
//! {"mode": "search", "tags": ["python", "snippets"]}
//! search: python, snippets
//! python, snippets
//! ```

use crate::llm::{ChatMessage, LanguageModel};
use crate::prompts::{render, PromptLibrary, ROUTER_PROMPT};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;

static MODE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(search|chat)\s*:\s*(.*)$").expect("valid intent line regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// List matching notes without synthesis.
    Search,
    /// Answer from retrieved notes.
    Chat,
}

impl Mode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Some(Self::Search),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

/// Routing decision for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub mode: Mode,
    /// Known tag names to scan, never empty when any tag exists.
    pub tags: Vec<String>,
    /// True when the tags are the all-tags fallback.
    pub fallback_scope: bool,
}

#[derive(Debug, Deserialize)]
struct RouterReply {
    mode: String,
    #[serde(default)]
    tags: Value,
}

/// Asks the model for an intent; never fails.
///
/// Call failures and unreadable replies default to chat over all tags.
/// A readable reply whose tags are all unknown keeps its mode but widens
/// the scope to all tags.
pub fn classify(
    llm: &dyn LanguageModel,
    prompts: &PromptLibrary,
    query: &str,
    known_tags: &[String],
) -> Intent {
    let started_at = Instant::now();
    let template = prompts.template(ROUTER_PROMPT).unwrap_or("{query}");
    let tag_list = format!("[{}]", known_tags.join(", "));
    let prompt = render(template, &[("query", query), ("all_tags", &tag_list)]);

    let parsed = match llm.complete(&[ChatMessage::user(prompt)]) {
        Ok(reply) => parse_reply(&reply, known_tags),
        Err(err) => {
            warn!(
                "event=intent_classify module=agent status=error error_kind={}",
                err.kind()
            );
            None
        }
    };

    let intent = match parsed {
        Some((mode, tags)) if !tags.is_empty() => Intent {
            mode,
            tags,
            fallback_scope: false,
        },
        Some((mode, _)) => Intent {
            mode,
            tags: known_tags.to_vec(),
            fallback_scope: true,
        },
        None => Intent {
            mode: Mode::Chat,
            tags: known_tags.to_vec(),
            fallback_scope: true,
        },
    };

    info!(
        "event=intent_classify module=agent status=ok mode={:?} tag_count={} fallback={} duration_ms={}",
        intent.mode,
        intent.tags.len(),
        intent.fallback_scope,
        started_at.elapsed().as_millis()
    );
    intent
}

/// Parses a router reply into a mode and the known tags it names.
///
/// Returns `None` when the reply carries neither a mode nor a known tag.
pub fn parse_reply(reply: &str, known_tags: &[String]) -> Option<(Mode, Vec<String>)> {
    if let Some(parsed) = parse_json_reply(reply) {
        let (mode, candidates) = parsed;
        return Some((mode, resolve_tags(&candidates, known_tags)));
    }

    if let Some(caps) = MODE_LINE_RE.captures(reply) {
        let mode = Mode::parse(&caps[1])?;
        let candidates = split_tags(&caps[2]);
        return Some((mode, resolve_tags(&candidates, known_tags)));
    }

    // Bare tag list: the model skipped the mode.
    let first_line = reply.lines().find(|line| !line.trim().is_empty())?;
    let tags = resolve_tags(&split_tags(first_line), known_tags);
    if tags.is_empty() {
        None
    } else {
        Some((Mode::Chat, tags))
    }
}

fn parse_json_reply(reply: &str) -> Option<(Mode, Vec<String>)> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: RouterReply = serde_json::from_str(&reply[start..=end]).ok()?;
    let mode = Mode::parse(&parsed.mode)?;
    let candidates = match parsed.tags {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(text) => split_tags(&text),
        _ => Vec::new(),
    };
    Some((mode, candidates))
}

fn split_tags(text: &str) -> Vec<String> {
    text.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|tag| tag.trim().trim_matches(['"', '\'', '`']).trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Maps candidates onto known tag names, case-insensitively, deduplicated.
fn resolve_tags(candidates: &[String], known_tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter_map(|candidate| {
            let wanted = candidate.to_lowercase();
            known_tags.iter().find(|known| known.to_lowercase() == wanted)
        })
        .filter(|known| seen.insert(known.as_str()))
        .cloned()
        .collect()
}
