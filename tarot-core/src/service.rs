//! The reading pipeline end to end.
//!
//! Validate, analyze, detect patterns, retrieve, assemble, generate with
//! fallback, gate, record metrics, respond. Each request is independent; the
//! only shared state is the read-only knowledge base.

use crate::analysis::{analyze, ElementBalance, ReversalProfile, SpreadAnalysis};
use crate::backend::{
    BackendSelector, ChunkSink, CompositionHints, ExpectedCard, GenerationRequest,
    NarrativeResult, SelectorError, StreamChunk,
};
use crate::cards::Suit;
use crate::config::ReadingConfig;
use crate::deck_style::DeckStyle;
use crate::error::{ReadingError, Result};
use crate::gate::{GateInput, QualityGate, QuerentContext};
use crate::knowledge_base::KnowledgeBase;
use crate::metrics::{self, JsonlMetricsSink, MetricsRecord, MetricsSink, NullMetricsSink};
use crate::patterns::{JourneySummary, PatternDetector, PatternMatch};
use crate::prompt::{AssemblyInput, PromptAssembler, PromptMeta, Redactor};
use crate::request::{ReadingRequest, ReversalLens};
use crate::retrieval::{HashingEmbedder, RetrievalOutcome, Retriever};
use crate::spread::Spread;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shown in place of a blocked narrative.
pub const SAFE_FALLBACK_MESSAGE: &str = "We weren't able to put together a reading we're \
comfortable sharing for this spread. The cards you drew are still yours to reflect on: take a \
moment with each position and notice what it brings up for you, or try drawing again later.";

const GENERATION_TEMPERATURE: f32 = 0.8;

/// Symbolic summary returned alongside the reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Themes {
    pub suit_counts: BTreeMap<Suit, usize>,
    pub element_balance: ElementBalance,
    pub major_ratio: f32,
    pub reversal_profile: ReversalProfile,
    pub journey: JourneySummary,
    pub pattern_keys: Vec<String>,
    pub reversal_lens: Option<ReversalLens>,
}

impl Themes {
    fn new(
        analysis: &SpreadAnalysis,
        journey: JourneySummary,
        patterns: &[PatternMatch],
        lens: Option<ReversalLens>,
    ) -> Self {
        Self {
            suit_counts: analysis.suit_counts.clone(),
            element_balance: analysis.element_balance.clone(),
            major_ratio: analysis.major_ratio(),
            reversal_profile: analysis.reversal_profile,
            journey,
            pattern_keys: patterns.iter().map(|m| m.key.clone()).collect(),
            reversal_lens: lens,
        }
    }
}

/// What callers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingResponse {
    pub reading: String,
    pub spread_analysis: SpreadAnalysis,
    pub themes: Themes,
    pub provider: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl ReadingResponse {
    pub fn is_blocked(&self) -> bool {
        self.blocked.unwrap_or(false)
    }
}

/// Everything computed before generation.
struct Prepared {
    request_id: String,
    style: DeckStyle,
    analysis: SpreadAnalysis,
    themes: Themes,
    meta: PromptMeta,
    generation: GenerationRequest,
}

pub struct ReadingService {
    detector: PatternDetector,
    retriever: Retriever,
    assembler: PromptAssembler,
    selector: BackendSelector,
    gate: QualityGate,
    metrics: Arc<dyn MetricsSink>,
}

impl ReadingService {
    pub fn new(
        retriever: Retriever,
        assembler: PromptAssembler,
        selector: BackendSelector,
        gate: QualityGate,
    ) -> Self {
        Self {
            detector: PatternDetector::new(),
            retriever,
            assembler,
            selector,
            gate,
            metrics: Arc::new(NullMetricsSink),
        }
    }

    /// Build every stage from configuration over the embedded knowledge base.
    pub async fn from_config(config: &ReadingConfig) -> Result<Self> {
        let mut kb = KnowledgeBase::embedded()?;
        let mut retriever_embedder = None;
        if config.retrieval.hashing_embedder {
            let embedder = Arc::new(HashingEmbedder::default());
            match kb.precompute_embeddings(embedder.as_ref()).await {
                Ok(count) => {
                    tracing::info!(passages = count, "Passage embeddings computed");
                    retriever_embedder = Some(embedder);
                }
                Err(e) => tracing::warn!(error = %e, "Embeddings unavailable; keyword-only retrieval"),
            }
        }

        let mut retriever = Retriever::new(Arc::new(kb), config.retrieval.clone());
        if let Some(embedder) = retriever_embedder {
            retriever = retriever.with_embedder(embedder);
        }

        let selector = BackendSelector::from_config(&config.backends);
        tracing::info!(backends = ?selector.backend_ids(), "Backend chain ready");

        let mut service = Self::new(
            retriever,
            PromptAssembler::new(config.prompt.clone()),
            selector,
            QualityGate::from_config(config.gate.clone()),
        );
        if let Some(path) = &config.metrics.path {
            service = service.with_metrics_sink(Arc::new(JsonlMetricsSink::new(path)));
        }
        Ok(service)
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn with_detector(mut self, detector: PatternDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    /// Produce a reading, fully buffered.
    pub async fn read(
        &self,
        request: ReadingRequest,
        cancel: &CancellationToken,
    ) -> Result<ReadingResponse> {
        let prepared = self.prepare(&request, cancel).await?;
        let narrative = self
            .selector
            .generate(&prepared.generation, cancel)
            .await
            .map_err(selector_error)?;
        let response = self.finish(&request, prepared, narrative, cancel).await?;
        Ok(response)
    }

    /// Produce a reading, sending chunks on `tx` as it becomes deliverable.
    ///
    /// With the gate disabled chunks flow as the backend produces them, and a
    /// [`StreamChunk::Restart`] marks a fallback after partial output. With
    /// the gate enabled nothing is sent until it passes or blocks; then the
    /// reading (or the fallback message) goes out as one chunk.
    pub async fn read_streaming(
        &self,
        request: ReadingRequest,
        cancel: &CancellationToken,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ReadingResponse> {
        let prepared = self.prepare(&request, cancel).await?;

        if !self.gate.is_enabled() {
            let sink = ChunkSink::new(tx);
            let narrative = self
                .selector
                .generate_stream(&prepared.generation, cancel, &sink)
                .await
                .map_err(selector_error)?;
            let response = self.finish(&request, prepared, narrative, cancel).await?;
            return Ok(response);
        }

        let narrative = self
            .selector
            .generate(&prepared.generation, cancel)
            .await
            .map_err(selector_error)?;
        let response = self.finish(&request, prepared, narrative, cancel).await?;
        tx.send(StreamChunk::Delta(response.reading.clone()))
            .await
            .map_err(|e| ReadingError::Streaming(e.to_string()))?;
        Ok(response)
    }

    async fn prepare(
        &self,
        request: &ReadingRequest,
        cancel: &CancellationToken,
    ) -> Result<Prepared> {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let style = request
            .deck_style
            .as_deref()
            .map(DeckStyle::from_id)
            .unwrap_or_default();

        let spread = Spread::from_input(request.layout.as_deref(), style, &request.spread)?;
        let analysis = analyze(&spread);
        let patterns = self.detector.detect(&analysis);
        let journey = self.detector.journey_summary(&analysis);
        let lens = request
            .reversal_lens
            .or_else(|| ReversalLens::for_class(analysis.reversal_profile.class));
        tracing::info!(
            request_id = %request_id,
            cards = spread.len(),
            relationships = analysis.relationships.len(),
            patterns = patterns.len(),
            "Spread analyzed"
        );

        let keys: Vec<String> = patterns.iter().map(|m| m.key.clone()).collect();
        let query = retrieval_query(request);
        let retrieval: RetrievalOutcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ReadingError::Cancelled),
            outcome = self.retriever.retrieve(&keys, &query) => outcome,
        };

        let (prompt, meta) = self.assembler.assemble(&AssemblyInput {
            request,
            spread: &spread,
            analysis: &analysis,
            patterns: &patterns,
            retrieval: &retrieval,
            lens,
        });
        tracing::info!(
            request_id = %request_id,
            passages = meta.passages_included.len(),
            tokens = meta.estimated_tokens,
            truncated = meta.truncated,
            "Prompt assembled"
        );

        let generation = GenerationRequest {
            request_id: request_id.clone(),
            prompt,
            max_tokens: self.assembler.config().max_output_tokens,
            temperature: GENERATION_TEMPERATURE,
            expected: ExpectedCard::from_analysis(&analysis),
            hints: CompositionHints {
                question: request.question.clone(),
                tone: request.personalization.tone,
                lens: if analysis.reversal_profile.count > 0 {
                    lens
                } else {
                    None
                },
                relationship_lines: analysis.relationship_lines(style),
                pattern_lines: patterns.iter().map(|m| m.describe(style)).collect(),
            },
        };

        Ok(Prepared {
            request_id,
            style,
            themes: Themes::new(&analysis, journey, &patterns, lens),
            analysis,
            meta,
            generation,
        })
    }

    /// Gate the narrative, record metrics and build the response.
    async fn finish(
        &self,
        request: &ReadingRequest,
        prepared: Prepared,
        narrative: NarrativeResult,
        cancel: &CancellationToken,
    ) -> Result<ReadingResponse> {
        let reflections = request.reflections.as_deref().unwrap_or_default();
        let input = GateInput {
            text: &narrative.text,
            expected: &narrative.expected,
            style: prepared.style,
            querent: QuerentContext {
                question: &request.question,
                reflections,
                focus_areas: &request.personalization.focus_areas,
            },
        };
        let outcome = self
            .gate
            .evaluate(&input, cancel)
            .await
            .map_err(|_| ReadingError::Cancelled)?;
        if cancel.is_cancelled() {
            return Err(ReadingError::Cancelled);
        }

        let redactor = match request.personalization.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => Redactor::new(&[name.trim()]),
            _ => Redactor::anonymous(),
        };
        let record = MetricsRecord::build(
            &prepared.request_id,
            &request.question,
            &narrative.text,
            &narrative.provider,
            &prepared.meta,
            &outcome,
            &redactor,
        );
        metrics::record(self.metrics.as_ref(), &record).await;

        let blocked = outcome.decision.is_blocked();
        tracing::info!(
            request_id = %prepared.request_id,
            provider = %narrative.provider,
            blocked,
            reason = outcome.decision.reason().map(|r| r.as_str()).unwrap_or("none"),
            overall = outcome.eval.overall,
            "Reading complete"
        );

        Ok(ReadingResponse {
            reading: if blocked {
                SAFE_FALLBACK_MESSAGE.to_string()
            } else {
                narrative.text
            },
            spread_analysis: prepared.analysis,
            themes: prepared.themes,
            provider: narrative.provider,
            request_id: prepared.request_id,
            blocked: outcome.enforced.then_some(blocked),
            block_reason: outcome
                .decision
                .reason()
                .map(|r| r.as_str().to_string()),
        })
    }
}

fn selector_error(e: SelectorError) -> ReadingError {
    match e {
        SelectorError::Cancelled => ReadingError::Cancelled,
        SelectorError::Exhausted { attempts } => ReadingError::BackendsExhausted { attempts },
    }
}

/// Text the retriever scores passages against.
fn retrieval_query(request: &ReadingRequest) -> String {
    let mut query = request.question.clone();
    if let Some(reflections) = &request.reflections {
        query.push(' ');
        query.push_str(reflections);
    }
    for area in &request.personalization.focus_areas {
        query.push(' ');
        query.push_str(area);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::spread::DrawnCardInput;
    use crate::testing::{service_with, MockBackend};
    use std::sync::atomic::Ordering;

    fn request() -> ReadingRequest {
        ReadingRequest::new(
            vec![
                DrawnCardInput::new("past", "Three of Cups", false),
                DrawnCardInput::new("present", "Four of Cups", false),
                DrawnCardInput::new("future", "Five of Cups", false),
            ],
            "How can I reconnect with my friends?",
        )
        .with_layout("three-card")
        .with_request_id("req-1")
    }

    #[tokio::test]
    async fn test_validation_error_before_generation() {
        let backend = MockBackend::success("primary", "unused");
        let calls = backend.calls();
        let service = service_with(vec![backend], GateConfig::default());
        let bad = ReadingRequest::new(
            vec![DrawnCardInput::new("past", "The Unicorn", false)],
            "q",
        );
        let err = service.read(bad, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReadingError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generated_request_id() {
        let service = service_with(vec![], GateConfig::default());
        let mut req = request();
        req.request_id = None;
        let response = service.read(req, &CancellationToken::new()).await.unwrap();
        assert!(Uuid::parse_str(&response.request_id).is_ok());
        assert_eq!(response.provider, "local");
    }

    #[tokio::test]
    async fn test_blocked_reading_is_replaced() {
        let service = service_with(
            vec![MockBackend::success(
                "primary",
                "Past: Three of Cups. Present: Four of Cups. Future: Five of Cups. Stop taking your medication.",
            )],
            GateConfig::default(),
        );
        let response = service.read(request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.blocked, Some(true));
        assert_eq!(response.reading, SAFE_FALLBACK_MESSAGE);
        assert_eq!(response.block_reason.as_deref(), Some("safety_score_low"));
    }

    #[tokio::test]
    async fn test_streaming_buffers_when_gate_enabled() {
        let service = service_with(vec![], GateConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let response = service
            .read_streaming(request(), &CancellationToken::new(), tx)
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec![StreamChunk::Delta(response.reading.clone())]);
    }

    #[tokio::test]
    async fn test_response_json_shape() {
        let service = service_with(vec![], GateConfig::default().with_enabled(false));
        let response = service.read(request(), &CancellationToken::new()).await.unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("spreadAnalysis").is_some());
        assert!(json.get("themes").is_some());
        assert_eq!(json["requestId"], "req-1");
        assert!(json.get("blocked").is_none());
        assert_eq!(json["themes"]["suitCounts"]["cups"], 3);
    }
}
