//! Retrieval router: intent classification, context retrieval and answer
//! synthesis over the note store.

pub mod intent;
pub mod knowledge_agent;
pub mod retriever;

pub use intent::{classify, parse_reply, Intent, Mode};
pub use knowledge_agent::{AgentError, KnowledgeAgent, Response, NO_MATCHES_MARKER};
pub use retriever::{ContextExcerpt, Retriever, TagScanRetriever};
