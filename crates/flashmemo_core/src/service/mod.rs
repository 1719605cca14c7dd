//! Core use-case services.
//!
//! # Responsibility
//! - Turn capture payloads into persisted notes.
//! - Keep capture sources and the CLI decoupled from storage details.

pub mod capture_service;

pub use capture_service::{CaptureError, CaptureService, DEFAULT_TAG};
