//! Completion engine access: HTTP client, wire models, prompts and the two calls
//! the pipeline makes (symbol filtering and edit generation).

pub mod client;
pub mod filter;
pub mod generate;
pub mod models;
pub mod prompts;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CompletionEngine, EngineClient, EngineSettings, StructuredResponse};
pub use filter::{ContextFilter, RelevantSymbolRef};
pub use generate::{CodeGenerator, EditBatch, FileEdit, UpdateMode};
pub use models::{EngineReply, EngineRequest, Usage};
