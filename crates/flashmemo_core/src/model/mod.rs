//! Domain model for captured notes.
//!
//! # Responsibility
//! - Define canonical data structures used by storage, capture and retrieval.
//!
//! # Invariants
//! - Every persisted object is identified by a stable `NoteId`.
//! - Updates replace the full note; there is no partial-field patch.

pub mod document;
pub mod note;
