//! Typed error hierarchy for the storyforge orchestrator.
//!
//! Three top-level enums cover the three collaborator boundaries:
//! - `PlanStoreError` — durable sprint-plan persistence failures
//! - `CompletionError` — LLM gateway failures
//! - `SandboxError` — project file-sandbox failures
//!
//! Validators and the scope guard return plain values instead of errors so
//! the state machine can branch without exception-style control flow.

use thiserror::Error;

/// Errors from the sprint-plan store.
#[derive(Debug, Error)]
pub enum PlanStoreError {
    #[error("Sprint plan {sprint_id} not found")]
    NotFound { sprint_id: String },

    #[error("Failed to read plan at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plan file {path} is not valid JSON: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the LLM completion gateway.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Completion request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Gateway returned HTTP {status}")]
    Http { status: u16 },

    #[error("Gateway response was not the expected shape: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors from the project file sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path rejected: {path} ({reason})")]
    PathRejected { path: String, reason: &'static str },

    #[error("File {path} not found in project {project}")]
    NotFound { project: String, path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
