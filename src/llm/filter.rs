use super::client::{call_structured, CompletionEngine, StructuredResponse};
use super::models::{EngineRequest, Message};
use super::{prompts, schema};
use crate::error::SpliceResult;
use crate::index::SymbolKind;
use serde::{Deserialize, Serialize};

/// A declaration the engine considers relevant to the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantSymbolRef {
    pub file: String,
    #[serde(alias = "nodeType")]
    pub kind: SymbolKind,
    pub name: String,
    pub description: String,
    /// Enclosing declaration's signature; empty for top-level declarations
    pub parent_signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelevantSymbols {
    #[serde(alias = "nodes")]
    symbols: Vec<RelevantSymbolRef>,
}

/// First engine call: pick the declarations worth showing to the generator.
pub struct ContextFilter<'a, E> {
    engine: &'a E,
}

impl<'a, E: CompletionEngine> ContextFilter<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    pub async fn filter_nodes(
        &self,
        task: &str,
        index_text: &str,
    ) -> SpliceResult<StructuredResponse<Vec<RelevantSymbolRef>>> {
        let request = build_request(task, index_text);
        let response: StructuredResponse<RelevantSymbols> = call_structured(self.engine, &request).await?;
        log::debug!("Engine selected {} symbols", response.data.symbols.len());
        Ok(StructuredResponse {
            data: response.data.symbols,
            usage: response.usage,
        })
    }
}

fn build_request(task: &str, index_text: &str) -> EngineRequest {
    EngineRequest {
        messages: vec![
            Message::system(prompts::FILTER_SYSTEM),
            Message::system(index_text),
            Message::user(task),
        ],
        schema: schema::relevant_symbols(),
    }
}
