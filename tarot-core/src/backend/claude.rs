//! Anthropic Messages API backend.

use super::{BackendError, ChunkSink, GenerationRequest, NarrativeBackend};
use ::claude::{Claude, Message, Request, StopReason, StreamEvent};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

pub struct ClaudeBackend {
    id: String,
    client: Claude,
}

impl ClaudeBackend {
    pub fn new(id: impl Into<String>, client: Claude) -> Self {
        Self {
            id: id.into(),
            client,
        }
    }

    /// Build from an API key held in `key_var`. The client's own timeout is
    /// set slightly past the slot timeout so the selector's timer fires first.
    pub fn from_env_var(
        id: impl Into<String>,
        key_var: &str,
        model: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let id = id.into();
        let key = std::env::var(key_var).map_err(|_| {
            BackendError::NotConfigured(id.clone(), format!("{key_var} is not set"))
        })?;
        let mut client = Claude::with_timeout(key, timeout + Duration::from_secs(1))
            .map_err(|e| BackendError::from_claude(&id, e))?;
        if let Some(model) = model {
            client = client.with_model(model);
        }
        if let Some(base_url) = base_url {
            client = client.with_base_url(base_url);
        }
        Ok(Self::new(id, client))
    }

    fn request(&self, request: &GenerationRequest) -> Request {
        Request::new(vec![Message::user(request.prompt.user.clone())])
            .with_system(request.prompt.system.clone())
            .with_max_tokens(request.max_tokens)
            .with_temperature(request.temperature)
    }
}

#[async_trait]
impl NarrativeBackend for ClaudeBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let response = self
            .client
            .complete(self.request(request))
            .await
            .map_err(|e| BackendError::from_claude(&self.id, e))?;

        if response.stop_reason == StopReason::Refusal {
            return Err(BackendError::Malformed {
                backend: self.id.clone(),
                message: "model refused the request".to_string(),
            });
        }
        Ok(response.text())
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
    ) -> Result<String, BackendError> {
        let mut stream = self
            .client
            .stream(self.request(request))
            .await
            .map_err(|e| BackendError::from_claude(&self.id, e))?;

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|e| BackendError::from_claude(&self.id, e))? {
                StreamEvent::TextDelta { text: delta, .. } => {
                    text.push_str(&delta);
                    if !sink.send(delta).await {
                        tracing::debug!(backend = %self.id, "stream receiver dropped");
                    }
                }
                StreamEvent::MessageDelta {
                    stop_reason: Some(StopReason::Refusal),
                } => {
                    return Err(BackendError::Malformed {
                        backend: self.id.clone(),
                        message: "model refused the request".to_string(),
                    });
                }
                StreamEvent::Error { message } => {
                    return Err(BackendError::Api {
                        backend: self.id.clone(),
                        status: 500,
                        message,
                    });
                }
                StreamEvent::MessageStop => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_configured() {
        let result = ClaudeBackend::from_env_var(
            "claude",
            "TAROT_TEST_KEY_THAT_IS_NEVER_SET",
            None,
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(BackendError::NotConfigured(..))));
    }

    #[test]
    fn test_backend_id() {
        let client = Claude::new("test-key").unwrap();
        let backend = ClaudeBackend::new("primary", client);
        assert_eq!(backend.id(), "primary");
        assert!(backend.is_remote());
    }
}
