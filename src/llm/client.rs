use super::models::{EngineReply, EngineRequest, ResponsesBody, ResponsesRequest, Usage};
use crate::error::{SpliceError, SpliceResult};
use crate::util::sanitize_api_response;
use std::future::Future;
use std::time::Duration;

/// Anything that can turn a prompt plus output schema into generated text.
///
/// [`EngineClient`] talks to the real service; tests substitute scripted engines.
pub trait CompletionEngine: Send + Sync {
    fn complete(
        &self,
        request: &EngineRequest,
    ) -> impl Future<Output = SpliceResult<EngineReply>> + Send;
}

/// Connection settings for [`EngineClient`]
#[derive(Clone)]
pub struct EngineSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSettings")
            .field("api_key", &"[redacted]")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// HTTP client for a Responses-style completion endpoint.
///
/// Constructed once per run and handed to the filter and the generator.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    settings: EngineSettings,
}

impl EngineClient {
    pub fn new(settings: EngineSettings) -> SpliceResult<Self> {
        let http = create_http_client(settings.timeout)?;
        Ok(Self { http, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

fn create_http_client(timeout: Duration) -> SpliceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SpliceError::Config(format!("Failed to create HTTP client: {}", e)))
}

fn map_transport_error(err: reqwest::Error) -> SpliceError {
    let body = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "could not connect to the completion engine".to_string()
    } else {
        sanitize_api_response(&err.to_string())
    };
    SpliceError::EngineRequest {
        status: err.status().map(|s| s.as_u16()),
        body,
    }
}

impl CompletionEngine for EngineClient {
    async fn complete(&self, request: &EngineRequest) -> SpliceResult<EngineReply> {
        let body = ResponsesRequest::new(&self.settings.model, request);
        log::debug!(
            "POST {} (schema {}, {} messages)",
            self.settings.endpoint,
            request.schema.name,
            request.messages.len()
        );

        let response = self
            .http
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(SpliceError::EngineRequest {
                status: Some(status.as_u16()),
                body: sanitize_api_response(&text),
            });
        }

        extract_reply(&text)
    }
}

/// Pull the generated text out of a response body.
///
/// First non-null of `output_text`, `output[].content[].text`,
/// `choices[0].message.content`. Refusals and error objects fail closed.
pub fn extract_reply(payload: &str) -> SpliceResult<EngineReply> {
    let body: ResponsesBody = serde_json::from_str(payload)
        .map_err(|e| SpliceError::shape(format!("response is not a JSON object: {}", e), payload))?;

    if let Some(error) = body.error.as_ref().filter(|e| !e.is_null()) {
        return Err(SpliceError::shape(format!("engine reported an error: {}", error), payload));
    }

    let parts = body.output.iter().flat_map(|item| item.content.iter());
    if let Some(refusal) = parts.clone().find_map(|p| p.refusal.as_deref()) {
        return Err(SpliceError::shape(format!("engine refused: {}", refusal), payload));
    }
    if let Some(refusal) = body.choices.first().and_then(|c| c.message.refusal.as_deref()) {
        return Err(SpliceError::shape(format!("engine refused: {}", refusal), payload));
    }

    let text = body
        .output_text
        .clone()
        .or_else(|| parts.clone().find_map(|p| p.text.clone()))
        .or_else(|| body.choices.first().and_then(|c| c.message.content.clone()));

    match text {
        Some(text) => Ok(EngineReply {
            text,
            usage: body.usage,
        }),
        None => Err(SpliceError::shape("response carries no output text", payload)),
    }
}

/// Decoded structured output plus usage
#[derive(Debug, Clone)]
pub struct StructuredResponse<T> {
    pub data: T,
    pub usage: Option<Usage>,
}

/// Send `request` and decode the reply into `T`, failing closed on any mismatch.
pub async fn call_structured<E, T>(engine: &E, request: &EngineRequest) -> SpliceResult<StructuredResponse<T>>
where
    E: CompletionEngine,
    T: serde::de::DeserializeOwned,
{
    let reply = engine.complete(request).await?;
    let data = parse_structured_content(&reply.text)?;
    Ok(StructuredResponse {
        data,
        usage: reply.usage,
    })
}

pub(crate) fn parse_structured_content<T>(content: &str) -> SpliceResult<T>
where
    T: serde::de::DeserializeOwned,
{
    match serde_json::from_str::<T>(content) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            if let Some(stripped) = strip_markdown_fences(content) {
                if let Ok(value) = serde_json::from_str::<T>(stripped) {
                    return Ok(value);
                }
            }
            Err(SpliceError::shape(
                format!("output does not match the schema: {}", first_err),
                content,
            ))
        }
    }
}

/// Strip markdown code fences from a response, if it has them
fn strip_markdown_fences(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))?;
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    Some(inner.trim())
}
