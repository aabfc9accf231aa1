//! Inference collaborator: request types, the client trait, and an HTTP client
//! for OpenAI-compatible chat-completion endpoints.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// JPEG bytes, sent inline.
    Jpeg(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Number of inline images in this turn.
    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::Jpeg(_)))
            .count()
    }
}

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Constrain the reply to a single JSON object.
    pub json_reply: bool,
    pub temperature: f32,
}

/// Anything that can answer an [`InferenceRequest`] with the reply text.
///
/// Implementations report transport failures, timeouts and non-success
/// statuses as [`PipelineError::InferenceUnavailable`].
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, PipelineError>;
}

#[async_trait]
impl<T: InferenceClient + ?Sized> InferenceClient for &T {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, PipelineError> {
        (**self).complete(request).await
    }
}

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// `base_url` should be like `https://api.openai.com/v1` (no trailing slash).
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::InferenceUnavailable(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, PipelineError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = build_payload(request);
        info!(url = %url, model = %request.model, "sending inference request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "request failed" };
                PipelineError::InferenceUnavailable(format!("{kind}: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::InferenceUnavailable(format!(
                "server returned {}: {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::InferenceUnavailable(format!("reading reply body: {e}")))?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| PipelineError::MalformedResponse(format!("reply body is not JSON: {e}")))?;
        let content = reply_content(&body)?;
        debug!(chars = content.len(), "inference reply received");
        Ok(content)
    }
}

/// Chat-completions JSON body for `request`; images become data URLs.
pub fn build_payload(request: &InferenceRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let parts: Vec<Value> = m
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => json!({"type": "text", "text": text}),
                    ContentPart::Jpeg(bytes) => json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))}
                    }),
                })
                .collect();
            json!({"role": m.role.as_str(), "content": parts})
        })
        .collect();

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.temperature,
    });
    if request.json_reply {
        payload["response_format"] = json!({"type": "json_object"});
    }
    payload
}

/// `choices[0].message.content` of a chat-completions reply.
pub fn reply_content(body: &Value) -> Result<String, PipelineError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::MalformedResponse(format!(
                "no choices[0].message.content in reply: {}",
                body.to_string().chars().take(200).collect::<String>()
            ))
        })
}
