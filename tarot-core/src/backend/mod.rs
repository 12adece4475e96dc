//! Narrative generation backends.
//!
//! Every backend implements the closed [`NarrativeBackend`] interface; the
//! [`BackendSelector`] holds them in an ordered chain and falls through on
//! timeout or error. The local composer never touches the network and sits
//! at the end of every chain.

pub mod claude;
pub mod local;
pub mod openai;
pub mod selector;

pub use self::claude::ClaudeBackend;
pub use local::LocalComposer;
pub use openai::OpenAiCompatibleBackend;
pub use selector::{AttemptOutcome, BackendAttempt, BackendSelector, BackendSlot, SelectorError};

use crate::analysis::SpreadAnalysis;
use crate::cards::CardId;
use crate::prompt::Prompt;
use crate::request::{ReversalLens, Tone};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Backend failures. Recovered by falling through the chain.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{0} is not configured: {1}")]
    NotConfigured(String, String),

    #[error("{backend} timed out after {after_ms}ms")]
    Timeout { backend: String, after_ms: u64 },

    #[error("{backend} returned status {status}: {message}")]
    Api {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} network error: {message}")]
    Network { backend: String, message: String },

    #[error("{backend} returned a malformed response: {message}")]
    Malformed { backend: String, message: String },
}

impl BackendError {
    pub(crate) fn from_claude(backend: &str, e: ::claude::Error) -> Self {
        let backend = backend.to_string();
        match e {
            ::claude::Error::NoApiKey | ::claude::Error::Config(_) => {
                BackendError::NotConfigured(backend, e.to_string())
            }
            ::claude::Error::Timeout => BackendError::Timeout {
                backend,
                after_ms: 0,
            },
            ::claude::Error::Network(message) => BackendError::Network { backend, message },
            ::claude::Error::Api { status, message } => BackendError::Api {
                backend,
                status,
                message,
            },
            ::claude::Error::Parse(message) => BackendError::Malformed { backend, message },
        }
    }
}

/// A drawn card the narrative is expected to cover.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectedCard {
    pub position: String,
    pub card: CardId,
    /// Name under the spread's deck style.
    pub name: String,
    pub reversed: bool,
}

impl ExpectedCard {
    pub fn from_analysis(analysis: &SpreadAnalysis) -> Vec<ExpectedCard> {
        analysis
            .cards
            .iter()
            .map(|c| ExpectedCard {
                position: c.position.clone(),
                card: c.card,
                name: c.display_name.clone(),
                reversed: c.reversed,
            })
            .collect()
    }
}

/// Structured material for backends that compose rather than prompt.
#[derive(Debug, Clone, Default)]
pub struct CompositionHints {
    pub question: String,
    pub tone: Tone,
    pub lens: Option<ReversalLens>,
    pub relationship_lines: Vec<String>,
    pub pattern_lines: Vec<String>,
}

/// Input to one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: String,
    pub prompt: Prompt,
    pub max_tokens: usize,
    pub temperature: f32,
    pub expected: Vec<ExpectedCard>,
    pub hints: CompositionHints,
}

/// Generated text plus the backend that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeResult {
    pub text: String,
    pub provider: String,
    pub expected: Vec<ExpectedCard>,
    pub attempts: Vec<BackendAttempt>,
}

/// Chunk delivered while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Delta(String),
    /// The backend that was streaming failed; discard text received so far.
    Restart { next_backend: String },
}

/// Write side of a streaming channel, tracking whether anything was sent.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<StreamChunk>,
    sent: Arc<AtomicBool>,
}

impl ChunkSink {
    pub fn new(tx: mpsc::Sender<StreamChunk>) -> Self {
        Self {
            tx,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Forward a text delta. Returns false once the receiver is gone.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.is_empty() {
            return true;
        }
        self.sent.store(true, Ordering::Relaxed);
        self.tx.send(StreamChunk::Delta(text)).await.is_ok()
    }

    pub(crate) async fn restart(&self, next_backend: &str) {
        if self.sent.swap(false, Ordering::Relaxed) {
            let _ = self
                .tx
                .send(StreamChunk::Restart {
                    next_backend: next_backend.to_string(),
                })
                .await;
        }
    }
}

/// A generation backend.
#[async_trait]
pub trait NarrativeBackend: Send + Sync {
    /// Identifier reported as the response's provider.
    fn id(&self) -> &str;

    /// Whether calls leave the process.
    fn is_remote(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;

    /// Generate while forwarding text as it arrives. The default sends the
    /// finished text as a single chunk.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
    ) -> Result<String, BackendError> {
        let text = self.generate(request).await?;
        sink.send(text.clone()).await;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_error_mapping() {
        assert!(matches!(
            BackendError::from_claude("c", ::claude::Error::NoApiKey),
            BackendError::NotConfigured(..)
        ));
        assert!(matches!(
            BackendError::from_claude(
                "c",
                ::claude::Error::Api {
                    status: 529,
                    message: "overloaded".into()
                }
            ),
            BackendError::Api { status: 529, .. }
        ));
        assert!(matches!(
            BackendError::from_claude("c", ::claude::Error::Parse("x".into())),
            BackendError::Malformed { .. }
        ));
    }

    #[tokio::test]
    async fn test_chunk_sink_restart_only_after_text() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = ChunkSink::new(tx);
        sink.restart("b").await;
        sink.send("").await;
        sink.send("hello").await;
        sink.restart("b").await;
        drop(sink);

        let mut got = Vec::new();
        while let Some(chunk) = rx.recv().await {
            got.push(chunk);
        }
        assert_eq!(
            got,
            vec![
                StreamChunk::Delta("hello".into()),
                StreamChunk::Restart {
                    next_backend: "b".into()
                }
            ]
        );
    }
}
