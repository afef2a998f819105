use super::client::{call_structured, CompletionEngine, StructuredResponse};
use super::models::{EngineRequest, Message};
use super::{prompts, schema};
use crate::context::AssembledContext;
use crate::error::SpliceResult;
use serde::{Deserialize, Serialize};

/// How an edit's `code` is applied to its target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Replace the whole file
    #[default]
    UpdateFile,
    /// Replace one named declaration
    UpdateElement,
    /// Insert a new declaration
    CreateElement,
}

/// One proposed change, as returned by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub file_name: String,
    pub description: String,
    pub code: String,
    pub user_message: String,
    #[serde(default)]
    pub update_mode: Option<UpdateMode>,
    #[serde(default)]
    pub parent_signature: Option<String>,
    #[serde(default)]
    pub target_file: Option<String>,
}

impl FileEdit {
    pub fn mode(&self) -> UpdateMode {
        self.update_mode.unwrap_or_default()
    }

    /// `target_file` when non-empty, else `file_name`
    pub fn target(&self) -> &str {
        match self.target_file.as_deref().map(str::trim) {
            Some(target) if !target.is_empty() => target,
            _ => self.file_name.trim(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent_signature
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Edits returned by one generation call, applied in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBatch {
    #[serde(alias = "edits")]
    pub files: Vec<FileEdit>,
}

/// Second engine call: turn the task plus context into edits.
pub struct CodeGenerator<'a, E> {
    engine: &'a E,
}

impl<'a, E: CompletionEngine> CodeGenerator<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    pub async fn generate(
        &self,
        task: &str,
        context: Option<&AssembledContext>,
    ) -> SpliceResult<StructuredResponse<EditBatch>> {
        let request = build_request(task, context);
        let response: StructuredResponse<EditBatch> = call_structured(self.engine, &request).await?;
        log::debug!("Engine proposed {} edits", response.data.files.len());
        Ok(response)
    }
}

fn build_request(task: &str, context: Option<&AssembledContext>) -> EngineRequest {
    let mut messages = vec![Message::system(prompts::GENERATE_SYSTEM)];
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        messages.push(Message::system(format!(
            "{}{}",
            prompts::CONTEXT_PREAMBLE,
            context.render()
        )));
    }
    messages.push(Message::user(task));
    EngineRequest {
        messages,
        schema: schema::file_edits(),
    }
}
