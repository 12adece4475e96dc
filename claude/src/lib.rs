//! Minimal Anthropic Claude API client.
//!
//! Covers what narrative generation and judging need from the Messages API:
//! a system block plus user turns, whole-response completion, and SSE
//! streaming. Every client carries its own request timeout.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_TOKENS: usize = 1024;

/// Errors that can occur when using the Claude client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// Boxed stream of parsed server-sent events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// Claude API client.
#[derive(Clone)]
pub struct Claude {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Claude {
    /// Client with the default request timeout.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT)
    }

    /// Client whose requests are abandoned after `timeout`.
    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Client keyed from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_env_var("ANTHROPIC_API_KEY")
    }

    pub fn from_env_var(var: &str) -> Result<Self, Error> {
        let api_key = std::env::var(var).map_err(|_| Error::NoApiKey)?;
        Self::new(api_key)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API base (proxies, gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a request and wait for the whole response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let body: WireResponse = self
            .send(&request, false)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        let response = Response::from(body);
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "claude completion finished"
        );
        Ok(response)
    }

    /// Send a request and stream events as they arrive.
    pub async fn stream(&self, request: Request) -> Result<EventStream, Error> {
        let response = self.send(&request, true).await?;
        let events = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let events = match chunk {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(e) => vec![Err(Error::from(e))],
                };
                futures::future::ready(Some(futures::stream::iter(events)))
            })
            .flatten();
        Ok(Box::pin(events))
    }

    /// POST to `/messages`, turning non-2xx statuses into [`Error::Api`].
    async fn send(&self, request: &Request, stream: bool) -> Result<reqwest::Response, Error> {
        let wire = WireRequest {
            model: request.model.as_deref().unwrap_or(&self.model),
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: &request.messages,
            temperature: request.temperature,
            stream,
        };
        tracing::debug!(model = wire.model, max_tokens = wire.max_tokens, stream, "claude request");

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .headers(self.headers()?)
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn headers(&self) -> Result<HeaderMap, Error> {
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| Error::Config(format!("API key is not a valid header: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

/// A completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub max_tokens: usize,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

impl Request {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            messages,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Clamped to the API's 0.0..=1.0 range.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Prefill for the model's answer.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
    Assistant,
}

/// A finished completion. Only text blocks are kept.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub blocks: Vec<String>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl Response {
    /// All text blocks, concatenated.
    pub fn text(&self) -> String {
        self.blocks.concat()
    }
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        Self {
            id: wire.id,
            model: wire.model,
            blocks: wire
                .content
                .into_iter()
                .filter_map(|block| match block {
                    WireBlock::Text { text } => Some(text),
                    WireBlock::Other => None,
                })
                .collect(),
            stop_reason: StopReason::parse(wire.stop_reason.as_deref()),
            usage: wire.usage,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Refusal,
}

impl StopReason {
    fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            Some("refusal") => StopReason::Refusal,
            _ => StopReason::EndTurn,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Streaming
// ============================================================================

/// Events from a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart { id: String, model: String },
    TextDelta { index: usize, text: String },
    MessageDelta { stop_reason: Option<StopReason> },
    MessageStop,
    Ping,
    Error { message: String },
}

/// Incremental SSE decoder. Holds partial lines until the rest arrives.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: String,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, Error>> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(end) = self.pending.find('\n') {
            let line = self.pending[..end].trim_end_matches('\r');
            let payload = line.strip_prefix("data:").map(str::trim_start);
            match payload {
                Some("[DONE]") => events.push(Ok(StreamEvent::MessageStop)),
                Some(json) if !json.is_empty() => {
                    match serde_json::from_str::<WireEvent>(json) {
                        Ok(event) => events.extend(event.into_event().map(Ok)),
                        // A data line cut mid-JSON waits for the next chunk.
                        Err(e) if e.is_eof() => break,
                        Err(e) => events.push(Err(Error::Parse(format!("SSE event: {e}")))),
                    }
                }
                _ => {}
            }
            self.pending.drain(..=end);
        }
        events
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart { message: WireStart },
    ContentBlockDelta { index: usize, delta: WireDelta },
    MessageDelta { delta: WireMessageDelta },
    MessageStop,
    Ping,
    Error { error: WireError },
    #[serde(other)]
    Unhandled,
}

#[derive(Deserialize)]
struct WireStart {
    id: String,
    model: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

impl WireEvent {
    fn into_event(self) -> Option<StreamEvent> {
        match self {
            WireEvent::MessageStart { message } => Some(StreamEvent::MessageStart {
                id: message.id,
                model: message.model,
            }),
            WireEvent::ContentBlockDelta {
                index,
                delta: WireDelta::TextDelta { text },
            } => Some(StreamEvent::TextDelta { index, text }),
            WireEvent::ContentBlockDelta { .. } | WireEvent::Unhandled => None,
            WireEvent::MessageDelta { delta } => Some(StreamEvent::MessageDelta {
                stop_reason: delta
                    .stop_reason
                    .map(|reason| StopReason::parse(Some(&reason))),
            }),
            WireEvent::MessageStop => Some(StreamEvent::MessageStop),
            WireEvent::Ping => Some(StreamEvent::Ping),
            WireEvent::Error { error } => Some(StreamEvent::Error {
                message: error.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let client = Claude::new("test-key").unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.base_url, API_BASE);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(Claude::new("  "), Err(Error::NoApiKey)));
    }

    #[test]
    fn test_model_and_base_url() {
        let client = Claude::new("test-key")
            .unwrap()
            .with_model("claude-3-5-haiku-20241022")
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.model(), "claude-3-5-haiku-20241022");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_wire_request_shape() {
        let request = Request::new(vec![Message::user("Read my cards")])
            .with_system("You are a careful reader")
            .with_max_tokens(600)
            .with_temperature(1.7);
        let wire = WireRequest {
            model: "m",
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: &request.messages,
            temperature: request.temperature,
            stream: false,
        };
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Read my cards");
        assert_eq!(json["temperature"], 1.0);
        assert_eq!(json["max_tokens"], 600);
    }

    #[test]
    fn test_response_keeps_text_blocks() {
        let wire: WireResponse = serde_json::from_str(
            r#"{
                "id": "msg_1",
                "model": "m",
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "The Three of Cups "},
                    {"type": "text", "text": "opens the spread."}
                ],
                "stop_reason": "refusal",
                "usage": {"input_tokens": 12, "output_tokens": 7}
            }"#,
        )
        .unwrap();
        let response = Response::from(wire);
        assert_eq!(response.text(), "The Three of Cups opens the spread.");
        assert_eq!(response.stop_reason, StopReason::Refusal);
        assert_eq!(response.usage.output_tokens, 7);
    }

    #[test]
    fn test_sse_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(
            b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel",
        );
        assert!(first.is_empty());

        let second = decoder.push(b"lo\"}}\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].as_ref().unwrap(),
            &StreamEvent::TextDelta {
                index: 0,
                text: "Hello".to_string()
            }
        );
        assert!(decoder.pending.is_empty());
    }

    #[test]
    fn test_sse_skips_unhandled_events() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(
            b"data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\ndata: {\"type\":\"message_stop\"}\n",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::MessageDelta {
                stop_reason: Some(StopReason::EndTurn)
            }
        );
        assert_eq!(events[1].as_ref().unwrap(), &StreamEvent::MessageStop);
    }

    #[test]
    fn test_sse_error_event() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(
            b"data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n",
        );
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Error {
                message: "Overloaded".to_string()
            }
        );
    }
}
