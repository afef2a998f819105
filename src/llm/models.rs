use serde::{Deserialize, Serialize};

/// Default model for both engine calls
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";

/// Default Responses-style endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A named JSON schema the engine output must conform to
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

/// Everything one engine call needs apart from credentials and model
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub messages: Vec<Message>,
    pub schema: OutputSchema,
}

/// Generated text plus whatever usage the engine reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReply {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Token usage as reported by the engine
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Merge two optional Usage values, summing their token counts
    pub fn merge(primary: Option<Usage>, secondary: Option<Usage>) -> Option<Usage> {
        match (primary, secondary) {
            (Some(p), Some(s)) => Some(Usage {
                input_tokens: p.input_tokens + s.input_tokens,
                output_tokens: p.output_tokens + s.output_tokens,
                total_tokens: p.total_tokens + s.total_tokens,
            }),
            (Some(p), None) => Some(p),
            (None, s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub(crate) struct ResponsesRequest<'a> {
    pub model: &'a str,
    pub input: &'a [Message],
    pub text: TextConfig<'a>,
}

#[derive(Serialize)]
pub(crate) struct TextConfig<'a> {
    pub format: FormatConfig<'a>,
}

#[derive(Serialize)]
pub(crate) struct FormatConfig<'a> {
    #[serde(rename = "type")]
    pub format_type: &'static str,
    pub name: &'a str,
    pub schema: &'a serde_json::Value,
    pub strict: bool,
}

impl<'a> ResponsesRequest<'a> {
    pub fn new(model: &'a str, request: &'a EngineRequest) -> Self {
        Self {
            model,
            input: &request.messages,
            text: TextConfig {
                format: FormatConfig {
                    format_type: "json_schema",
                    name: request.schema.name,
                    schema: &request.schema.schema,
                    strict: true,
                },
            },
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct ResponsesBody {
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct OutputItem {
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct Choice {
    #[serde(default)]
    pub message: ChoiceMessage,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
}
