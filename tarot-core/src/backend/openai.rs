//! OpenAI-compatible chat completions backend.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! with the usual request and response shape.

use super::{BackendError, GenerationRequest, NarrativeBackend};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiCompatibleBackend {
    id: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let id = id.into();
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackendError::NotConfigured(id, "empty API key".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(1))
            .build()
            .map_err(|e| BackendError::NotConfigured(id.clone(), e.to_string()))?;
        Ok(Self {
            id,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn from_env_var(
        id: impl Into<String>,
        base_url: impl Into<String>,
        key_var: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let id = id.into();
        let key = std::env::var(key_var).map_err(|_| {
            BackendError::NotConfigured(id.clone(), format!("{key_var} is not set"))
        })?;
        Self::new(id, base_url, key, timeout)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| BackendError::NotConfigured(self.id.clone(), e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first choice's text out of a response body.
fn parse_chat_response(backend: &str, body: &str) -> Result<String, BackendError> {
    let malformed = |message: String| BackendError::Malformed {
        backend: backend.to_string(),
        message,
    };
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| malformed(format!("{e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| malformed("no choices".to_string()))?;
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(malformed("content filtered".to_string()));
    }
    choice
        .message
        .content
        .ok_or_else(|| malformed("choice has no content".to_string()))
}

#[async_trait]
impl NarrativeBackend for OpenAiCompatibleBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers()?)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        backend: self.id.clone(),
                        after_ms: 0,
                    }
                } else {
                    BackendError::Network {
                        backend: self.id.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| BackendError::Network {
            backend: self.id.clone(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(BackendError::Api {
                backend: self.id.clone(),
                status: status.as_u16(),
                message: body,
            });
        }
        parse_chat_response(&self.id, &body)
    }
}
