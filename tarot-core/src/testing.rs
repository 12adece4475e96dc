//! Testing utilities for the reading pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockBackend` for scripted generation without API calls
//! - `MockJudge` for scripted rubric scores and evaluator failures
//! - `MemoryMetricsSink` for inspecting what would be persisted
//! - Spread and request fixtures

use crate::backend::{
    BackendError, BackendSelector, BackendSlot, ChunkSink, CompositionHints, ExpectedCard,
    GenerationRequest, LocalComposer, NarrativeBackend,
};
use crate::cards::{CardId, Rank, Suit};
use crate::config::{GateConfig, PromptConfig, RetrievalConfig};
use crate::gate::{EvalResult, EvaluatorError, Judge, JudgeInput, QualityGate};
use crate::knowledge_base::KnowledgeBase;
use crate::metrics::{MetricsError, MetricsRecord, MetricsSink, RecordedScores};
use crate::prompt::{Prompt, PromptAssembler};
use crate::request::ReadingRequest;
use crate::retrieval::Retriever;
use crate::service::ReadingService;
use crate::spread::DrawnCardInput;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ============================================================================
// Backends
// ============================================================================

#[derive(Debug, Clone)]
enum Script {
    Success(String),
    Fail,
    Delay(Duration),
    PartialThenFail(String),
}

/// A backend that follows a script.
pub struct MockBackend {
    id: String,
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    fn new(id: impl Into<String>, script: Script) -> Self {
        Self {
            id: id.into(),
            script,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always returns `text`.
    pub fn success(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Script::Success(text.into()))
    }

    /// Always fails with a 503.
    pub fn failing(id: impl Into<String>) -> Self {
        Self::new(id, Script::Fail)
    }

    /// Sleeps for `delay`, then answers. Use with a shorter slot timeout.
    pub fn delayed(id: impl Into<String>, delay: Duration) -> Self {
        Self::new(id, Script::Delay(delay))
    }

    /// Streams `text`, then fails.
    pub fn partial_then_fail(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Script::PartialThenFail(text.into()))
    }

    /// Shared call counter.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    fn unavailable(&self) -> BackendError {
        BackendError::Api {
            backend: self.id.clone(),
            status: 503,
            message: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl NarrativeBackend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Success(text) => Ok(text.clone()),
            Script::Fail | Script::PartialThenFail(_) => Err(self.unavailable()),
            Script::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok("A reading that arrived too late.".to_string())
            }
        }
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
    ) -> Result<String, BackendError> {
        if let Script::PartialThenFail(text) = &self.script {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sink.send(text.clone()).await;
            return Err(self.unavailable());
        }
        let text = self.generate(request).await?;
        sink.send(text.clone()).await;
        Ok(text)
    }
}

// ============================================================================
// Judge
// ============================================================================

/// A judge that returns fixed scores, fails, or hangs.
pub struct MockJudge {
    result: Result<EvalResult, EvaluatorError>,
    delay: Option<Duration>,
}

impl MockJudge {
    pub fn scores(result: EvalResult) -> Self {
        Self {
            result: Ok(result),
            delay: None,
        }
    }

    /// Returns unparseable output.
    pub fn failing() -> Self {
        Self {
            result: Err(EvaluatorError::Parse("expected value at line 1".to_string())),
            delay: None,
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            result: Ok(EvalResult::new(5, 5, 5, 5)),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl Judge for MockJudge {
    async fn judge(&self, _input: &JudgeInput<'_>) -> Result<EvalResult, EvaluatorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Keeps records in memory.
#[derive(Default)]
pub struct MemoryMetricsSink {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn write(&self, record: &MetricsRecord) -> Result<(), MetricsError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// A record with fixed contents and timestamp.
pub fn sample_metrics_record(request_id: &str) -> MetricsRecord {
    MetricsRecord {
        request_id: request_id.to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        question: "What should I focus on?".to_string(),
        reading: "In the past position, the Three of Cups...".to_string(),
        scores: RecordedScores {
            personalization: 4,
            tarot_coherence: 5,
            tone: 5,
            safety: 5,
            overall: 5,
        },
        safety_flag: false,
        blocked: false,
        block_reason: None,
        gate_enforced: true,
        card_coverage: 1.0,
        missing_cards: Vec::new(),
        hallucinated_cards: Vec::new(),
        missing_positions: Vec::new(),
        provider: "local".to_string(),
        prompt_version: PromptConfig::default().prompt_version,
        eval_mode: "rule_based".to_string(),
        evaluator_error: None,
        prompt_tokens: 420,
        prompt_truncated: false,
        prompt_slimmed: false,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Three, Four and Five of Cups in past, present, future; all upright.
pub fn three_card_expected() -> Vec<ExpectedCard> {
    [Rank::Three, Rank::Four, Rank::Five]
        .into_iter()
        .zip(["past", "present", "future"])
        .map(|(rank, position)| {
            let card = CardId::minor(Suit::Cups, rank);
            ExpectedCard {
                position: position.to_string(),
                card,
                name: card.name(),
                reversed: false,
            }
        })
        .collect()
}

/// The three-card Cups run as a request.
pub fn three_cups_request(question: &str) -> ReadingRequest {
    ReadingRequest::new(
        vec![
            DrawnCardInput::new("past", "Three of Cups", false),
            DrawnCardInput::new("present", "Four of Cups", false),
            DrawnCardInput::new("future", "Five of Cups", false),
        ],
        question,
    )
    .with_layout("three-card")
}

/// A generation request around the given cards.
pub fn generation_request(expected: Vec<ExpectedCard>) -> GenerationRequest {
    GenerationRequest {
        request_id: "test-request".to_string(),
        prompt: Prompt {
            system: "system".to_string(),
            user: "user".to_string(),
        },
        max_tokens: 256,
        temperature: 0.0,
        expected,
        hints: CompositionHints {
            question: "What should I focus on?".to_string(),
            ..Default::default()
        },
    }
}

/// A service over the embedded knowledge base whose chain is `backends`
/// (one second each) followed by the local composer.
///
/// # Panics
///
/// If the embedded knowledge base fails to parse.
pub fn service_with(backends: Vec<MockBackend>, gate: GateConfig) -> ReadingService {
    let kb = KnowledgeBase::embedded().expect("embedded knowledge base parses");
    let mut slots: Vec<BackendSlot> = backends
        .into_iter()
        .map(|b| BackendSlot::new(Arc::new(b), Duration::from_secs(1)))
        .collect();
    slots.push(BackendSlot::new(
        Arc::new(LocalComposer::new()),
        Duration::from_secs(5),
    ));
    ReadingService::new(
        Retriever::new(Arc::new(kb), RetrievalConfig::default()),
        PromptAssembler::new(PromptConfig::default()),
        BackendSelector::new(slots),
        QualityGate::new(gate),
    )
}
