//! Error kinds surfaced by the pipeline.
//!
//! Which of these are fatal depends on the stage that raised them:
//! - `IndexBuild` and assembly-time `ResolutionMiss` are logged and skipped
//! - `EngineRequest` / `EngineResponseShape` abort the task before anything is applied
//! - `WorkspaceWrite` (and apply-time `ResolutionMiss`) fail a single edit; the
//!   rest of the batch still applies

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    #[error("Could not read {}: {source}", .path.display())]
    IndexBuild {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Completion engine request failed{}: {body}", status_suffix(.status))]
    EngineRequest { status: Option<u16>, body: String },

    #[error("Unexpected completion engine response: {reason}\nPayload: {payload}")]
    EngineResponseShape { reason: String, payload: String },

    #[error("No declaration matching `{signature}` in {}", .path.display())]
    ResolutionMiss { path: PathBuf, signature: String },

    #[error("Failed to write {}: {reason}", .path.display())]
    WorkspaceWrite { path: PathBuf, reason: String },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Another task is already running for this workspace")]
    Busy,

    #[error("Task is empty. Describe what should change.")]
    EmptyTask,

    #[error("No API key configured. Set OPENAI_API_KEY or run 'splice --setup'.")]
    MissingApiKey,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background worker failed: {0}")]
    Background(String),
}

pub type SpliceResult<T> = Result<T, SpliceError>;

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl SpliceError {
    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        SpliceError::WorkspaceWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn shape(reason: impl Into<String>, payload: &str) -> Self {
        SpliceError::EngineResponseShape {
            reason: reason.into(),
            payload: crate::util::sanitize_api_response(payload),
        }
    }
}
