use flashmemo_core::agent::knowledge_agent::MAX_HISTORY_TURNS;
use flashmemo_core::agent::{AgentError, KnowledgeAgent, Response, NO_MATCHES_MARKER};
use flashmemo_core::llm::Role;
use flashmemo_core::model::note::Note;
use flashmemo_core::prompts::{PromptLibrary, SUMMARY_PROMPT};
use flashmemo_core::{
    ChatMessage, ErrorKind, FsNoteStore, LanguageModel, LlmError, StorageBackend,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replies from a script and records every request.
#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    fn with_replies(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedLlm {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("(unscripted)".to_string()))
    }
}

fn seeded_store(dir: &std::path::Path) -> Arc<dyn StorageBackend> {
    let store = FsNoteStore::open(dir).unwrap();
    for (title, content, tag) in [
        ("List comprehension", "squares = [x*x for x in xs]", "python"),
        ("Virtualenv", "python -m venv .venv", "python"),
        ("Carbonara", "eggs, pecorino, guanciale\nno cream", "recipes"),
    ] {
        store
            .save(&Note::new(title, content, vec![tag.to_string()]))
            .unwrap();
    }
    Arc::new(store)
}

fn agent(store: Arc<dyn StorageBackend>, llm: Arc<ScriptedLlm>) -> KnowledgeAgent {
    KnowledgeAgent::new(store, llm, PromptLibrary::builtin())
}

fn last_user_prompt(request: &[ChatMessage]) -> &str {
    let last = request.last().unwrap();
    assert_eq!(last.role, Role::User);
    &last.content
}

#[test]
fn search_intent_lists_notes_with_a_single_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![Ok(
        r#"{"mode": "search", "tags": ["Python"]}"#.to_string(),
    )]);
    let agent = agent(seeded_store(dir.path()), llm.clone());

    let response = agent.answer("find my python notes").unwrap();
    let Response::Matches(matches) = response else {
        panic!("expected matches");
    };
    let mut names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["List comprehension", "Virtualenv"]);
    assert!(matches.iter().all(|m| m.tag == "python"));

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    let router_prompt = last_user_prompt(&requests[0]);
    assert!(router_prompt.contains("[python, recipes]"));
    assert!(router_prompt.contains("find my python notes"));
    assert_eq!(agent.history_turns(), 0);
}

#[test]
fn chat_intent_answers_from_retrieved_excerpts() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![
        Ok("chat: recipes".to_string()),
        Ok("Use eggs and pecorino [1].".to_string()),
    ]);
    let agent = agent(seeded_store(dir.path()), llm.clone());

    let response = agent.answer("how do I make carbonara?").unwrap();
    let Response::Answer { text, sources } = response else {
        panic!("expected an answer");
    };
    assert_eq!(text, "Use eggs and pecorino [1].");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].title, "Carbonara");
    assert_eq!(sources[0].excerpt, "eggs, pecorino, guanciale no cream");

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1][0].role, Role::System);
    let synthesis = last_user_prompt(&requests[1]);
    assert!(synthesis.contains("> [1] (Carbonara; tags: recipes)"));
    assert!(synthesis.contains("how do I make carbonara?"));
    assert_eq!(agent.history_turns(), 1);
}

#[test]
fn failed_classification_falls_back_to_chat_over_all_tags() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![
        Err(LlmError::Unavailable("timeout".to_string())),
        Ok("Here is what I found.".to_string()),
    ]);
    let agent = agent(seeded_store(dir.path()), llm.clone());

    let Response::Answer { sources, .. } = agent.answer("anything useful?").unwrap() else {
        panic!("fallback must synthesize");
    };
    assert_eq!(sources.len(), 3);
    assert_eq!(llm.requests().len(), 2);
}

#[test]
fn unreadable_classification_also_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![
        Ok("I am not sure what you mean.".to_string()),
        Ok("answer".to_string()),
    ]);
    let agent = agent(seeded_store(dir.path()), llm);

    let Response::Answer { sources, .. } = agent.answer("hmm").unwrap() else {
        panic!("fallback must synthesize");
    };
    assert_eq!(sources.len(), 3);
}

#[test]
fn failed_synthesis_is_llm_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![
        Ok("chat: python".to_string()),
        Err(LlmError::Unavailable("HTTP 503".to_string())),
    ]);
    let agent = agent(seeded_store(dir.path()), llm);

    let err = agent.answer("explain venv").unwrap_err();
    assert!(matches!(err, AgentError::LlmUnavailable(_)));
    assert_eq!(err.kind(), ErrorKind::LlmUnavailable);
    assert!(err.kind().is_recoverable());
    assert_eq!(agent.history_turns(), 0);
}

#[test]
fn empty_store_still_sends_an_explicit_empty_context() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageBackend> = Arc::new(FsNoteStore::open(dir.path()).unwrap());
    let llm = ScriptedLlm::with_replies(vec![
        Ok(r#"{"mode": "chat", "tags": []}"#.to_string()),
        Ok("You have no notes on that.".to_string()),
    ]);
    let agent = agent(store, llm.clone());

    let Response::Answer { text, sources } = agent.answer("what about golf?").unwrap() else {
        panic!("expected an answer");
    };
    assert_eq!(text, "You have no notes on that.");
    assert!(sources.is_empty());
    assert!(last_user_prompt(&llm.requests()[1]).contains(NO_MATCHES_MARKER));
}

#[test]
fn blank_query_is_rejected_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(Vec::new());
    let agent = agent(seeded_store(dir.path()), llm.clone());

    let err = agent.answer("   ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(llm.requests().is_empty());
}

#[test]
fn custom_summary_template_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![Ok("chat: recipes".to_string())]);
    let prompts = PromptLibrary::builtin().with_template(SUMMARY_PROMPT, "Q={query}\nC={context}");
    let agent = KnowledgeAgent::new(seeded_store(dir.path()), llm.clone(), prompts);

    agent.answer("carbonara").unwrap();
    assert!(last_user_prompt(&llm.requests()[1]).starts_with("Q=carbonara\nC=> [1]"));
}

#[test]
fn chat_history_is_replayed_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(Vec::new());
    let agent = agent(seeded_store(dir.path()), llm.clone());

    agent.chat("hello").unwrap();
    agent.chat("again").unwrap();
    let second = &llm.requests()[1];
    let contents: Vec<&str> = second.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(&contents[1..], &["hello", "(unscripted)", "again"]);

    for turn in 0..MAX_HISTORY_TURNS + 5 {
        agent.chat(&format!("turn {turn}")).unwrap();
    }
    assert_eq!(agent.history_turns(), MAX_HISTORY_TURNS);

    agent.clear_history();
    assert_eq!(agent.history_turns(), 0);
    agent.chat("fresh").unwrap();
    assert_eq!(llm.requests().last().unwrap().len(), 2);
}

#[test]
fn chat_reply_naming_only_unknown_tags_answers_over_all_tags() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::with_replies(vec![
        Ok(r#"{"mode": "chat", "tags": ["loops"]}"#.to_string()),
        Ok("Nothing about loops, but here is what you have.".to_string()),
    ]);
    let agent = agent(seeded_store(dir.path()), llm.clone());

    let Response::Answer { text, sources } = agent.answer("how do loops work?").unwrap() else {
        panic!("expected an answer");
    };
    assert_eq!(text, "Nothing about loops, but here is what you have.");
    let mut titles: Vec<&str> = sources.iter().map(|s| s.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Carbonara", "List comprehension", "Virtualenv"]);
    assert_eq!(llm.requests().len(), 2);
}

#[test]
fn secondary_tags_take_part_in_search_and_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = FsNoteStore::open(dir.path()).unwrap();
    let venv = Note::new(
        "venv",
        "python -m venv .venv",
        vec!["inbox".to_string(), "python".to_string()],
    );
    fs_store.save(&venv).unwrap();
    fs_store
        .save(&Note::new("milk", "buy milk", vec!["inbox".to_string()]))
        .unwrap();
    let store: Arc<dyn StorageBackend> = Arc::new(fs_store);

    let llm = ScriptedLlm::with_replies(vec![
        Ok("search: python".to_string()),
        Ok("chat: python".to_string()),
        Ok("Activate it first [1].".to_string()),
    ]);
    let agent = agent(store, llm.clone());

    let Response::Matches(matches) = agent.answer("python notes").unwrap() else {
        panic!("expected matches");
    };
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, venv.id);
    assert!(last_user_prompt(&llm.requests()[0]).contains("[inbox, python]"));

    let Response::Answer { sources, .. } = agent.answer("how do I make a venv?").unwrap() else {
        panic!("expected an answer");
    };
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].id, venv.id);
}
