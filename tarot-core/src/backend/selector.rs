//! Ordered fallback over generation backends.
//!
//! Slots are tried one at a time, never raced, each bounded by its own
//! timeout. A timeout, an error or empty text moves on to the next slot.

use super::{
    BackendError, ChunkSink, ClaudeBackend, GenerationRequest, LocalComposer,
    NarrativeBackend, NarrativeResult, OpenAiCompatibleBackend,
};
use crate::config::{BackendConfig, BackendKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A backend and the time it is allowed.
#[derive(Clone)]
pub struct BackendSlot {
    pub backend: Arc<dyn NarrativeBackend>,
    pub timeout: Duration,
}

impl BackendSlot {
    pub fn new(backend: Arc<dyn NarrativeBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

impl std::fmt::Debug for BackendSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSlot")
            .field("backend", &self.backend.id())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Error(String),
    Empty,
}

/// Record of one backend call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendAttempt {
    pub backend: String,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Error)]
pub enum SelectorError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("All {} backends failed", attempts.len())]
    Exhausted { attempts: Vec<BackendAttempt> },
}

pub struct BackendSelector {
    slots: Vec<BackendSlot>,
}

impl BackendSelector {
    pub fn new(slots: Vec<BackendSlot>) -> Self {
        Self { slots }
    }

    /// Build the chain from configuration. Remote backends that cannot be
    /// constructed are skipped; a local composer is appended when the chain
    /// has none.
    pub fn from_config(configs: &[BackendConfig]) -> Self {
        let mut slots = Vec::new();
        for config in configs {
            let timeout = Duration::from_millis(config.timeout_ms);
            match build_backend(config, timeout) {
                Ok(backend) => slots.push(BackendSlot::new(backend, timeout)),
                Err(e) => {
                    tracing::warn!(backend = %config.id, error = %e, "Skipping backend");
                }
            }
        }
        if !slots.iter().any(|s| !s.backend.is_remote()) {
            slots.push(BackendSlot::new(
                Arc::new(LocalComposer::new()),
                Duration::from_millis(BackendConfig::local().timeout_ms),
            ));
        }
        Self::new(slots)
    }

    pub fn slots(&self) -> &[BackendSlot] {
        &self.slots
    }

    pub fn backend_ids(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.backend.id()).collect()
    }

    /// Generate with fallback, buffering the whole text.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<NarrativeResult, SelectorError> {
        self.run(request, cancel, None).await
    }

    /// Generate with fallback, forwarding text through `sink` as it arrives.
    /// When a backend fails after sending text, a restart marker is sent
    /// before the next backend begins.
    pub async fn generate_stream(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        sink: &ChunkSink,
    ) -> Result<NarrativeResult, SelectorError> {
        self.run(request, cancel, Some(sink)).await
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        sink: Option<&ChunkSink>,
    ) -> Result<NarrativeResult, SelectorError> {
        let mut attempts = Vec::with_capacity(self.slots.len());

        for (i, slot) in self.slots.iter().enumerate() {
            let id = slot.backend.id();
            let started = Instant::now();
            let call = async {
                match sink {
                    Some(sink) => slot.backend.generate_stream(request, sink).await,
                    None => slot.backend.generate(request).await,
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(request_id = %request.request_id, backend = %id, "Generation cancelled");
                    return Err(SelectorError::Cancelled);
                }
                result = tokio::time::timeout(slot.timeout, call) => result,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    attempts.push(BackendAttempt {
                        backend: id.to_string(),
                        outcome: AttemptOutcome::Success,
                        elapsed_ms,
                    });
                    tracing::info!(
                        request_id = %request.request_id,
                        backend = %id,
                        elapsed_ms,
                        "Narrative generated"
                    );
                    return Ok(NarrativeResult {
                        text,
                        provider: id.to_string(),
                        expected: request.expected.clone(),
                        attempts,
                    });
                }
                Ok(Ok(_)) => AttemptOutcome::Empty,
                Ok(Err(e)) => AttemptOutcome::Error(e.to_string()),
                Err(_) => AttemptOutcome::Timeout,
            };

            tracing::warn!(
                request_id = %request.request_id,
                backend = %id,
                elapsed_ms,
                reason = ?outcome,
                "Backend failed, falling through"
            );
            attempts.push(BackendAttempt {
                backend: id.to_string(),
                outcome,
                elapsed_ms,
            });

            if let (Some(sink), Some(next)) = (sink, self.slots.get(i + 1)) {
                sink.restart(next.backend.id()).await;
            }
        }

        Err(SelectorError::Exhausted { attempts })
    }
}

fn build_backend(
    config: &BackendConfig,
    timeout: Duration,
) -> Result<Arc<dyn NarrativeBackend>, BackendError> {
    match config.kind {
        BackendKind::Local => Ok(Arc::new(LocalComposer::new().with_id(&config.id))),
        BackendKind::Claude => {
            let key_var = config.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");
            Ok(Arc::new(ClaudeBackend::from_env_var(
                &config.id,
                key_var,
                config.model.as_deref(),
                config.base_url.as_deref(),
                timeout,
            )?))
        }
        BackendKind::OpenaiCompatible => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                BackendError::NotConfigured(config.id.clone(), "base_url is required".to_string())
            })?;
            let key_var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
            let mut backend =
                OpenAiCompatibleBackend::from_env_var(&config.id, base_url, key_var, timeout)?;
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StreamChunk;
    use crate::testing::{generation_request, three_card_expected, MockBackend};
    use tokio::sync::mpsc;

    fn slot(backend: impl NarrativeBackend + 'static, timeout_ms: u64) -> BackendSlot {
        BackendSlot::new(Arc::new(backend), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_primary_success() {
        let selector = BackendSelector::new(vec![
            slot(MockBackend::success("primary", "A reading."), 1000),
            slot(MockBackend::success("secondary", "Another."), 1000),
        ]);
        let result = selector
            .generate(&generation_request(three_card_expected()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.provider, "primary");
        assert_eq!(result.text, "A reading.");
        assert_eq!(result.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_fall_through_to_local() {
        let selector = BackendSelector::new(vec![
            slot(MockBackend::delayed("primary", Duration::from_secs(60)), 100),
            slot(MockBackend::delayed("secondary", Duration::from_secs(60)), 100),
            slot(LocalComposer::new(), 1000),
        ]);
        let result = selector
            .generate(&generation_request(three_card_expected()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.provider, "local");
        assert!(!result.text.is_empty());
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Timeout);
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::Timeout);
        assert_eq!(result.attempts[2].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn test_error_and_empty_fall_through() {
        let selector = BackendSelector::new(vec![
            slot(MockBackend::failing("primary"), 1000),
            slot(MockBackend::success("secondary", "   "), 1000),
            slot(MockBackend::success("third", "Text."), 1000),
        ]);
        let result = selector
            .generate(&generation_request(three_card_expected()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.provider, "third");
        assert!(matches!(result.attempts[0].outcome, AttemptOutcome::Error(_)));
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::Empty);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let selector = BackendSelector::new(vec![slot(MockBackend::failing("only"), 1000)]);
        let err = selector
            .generate(&generation_request(three_card_expected()), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SelectorError::Exhausted { attempts } => assert_eq!(attempts.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_call() {
        let selector = BackendSelector::new(vec![slot(
            MockBackend::delayed("slow", Duration::from_secs(60)),
            120_000,
        )]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = selector
            .generate(&generation_request(three_card_expected()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectorError::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_restart_after_partial_failure() {
        let selector = BackendSelector::new(vec![
            slot(MockBackend::partial_then_fail("primary", "Half a"), 1000),
            slot(MockBackend::success("secondary", "Whole reading."), 1000),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ChunkSink::new(tx);
        let result = selector
            .generate_stream(
                &generation_request(three_card_expected()),
                &CancellationToken::new(),
                &sink,
            )
            .await
            .unwrap();
        drop(sink);
        assert_eq!(result.provider, "secondary");

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Delta("Half a".into()),
                StreamChunk::Restart {
                    next_backend: "secondary".into()
                },
                StreamChunk::Delta("Whole reading.".into()),
            ]
        );
    }

    #[test]
    fn test_from_config_always_ends_local() {
        let configs = vec![
            BackendConfig::claude("claude").with_api_key_env("TAROT_TEST_UNSET_KEY_A"),
            BackendConfig::openai_compatible("backup", "http://localhost:1")
                .with_api_key_env("TAROT_TEST_UNSET_KEY_B"),
        ];
        let selector = BackendSelector::from_config(&configs);
        assert_eq!(selector.backend_ids(), vec!["local"]);
    }
}
