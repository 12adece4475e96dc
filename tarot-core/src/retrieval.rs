//! Passage retrieval for matched pattern keys.
//!
//! Candidates come from the knowledge base's tag index. Each one gets a
//! relevance against the querent's question: whole-word keyword overlap,
//! blended with embedding cosine similarity when an embedding backend is
//! available. Candidates below `min_relevance` are dropped. The editorial
//! weight only orders the survivors. If the embedding call fails or times
//! out, scoring quietly drops back to keywords only.

use crate::config::RetrievalConfig;
use crate::knowledge_base::{KnowledgeBase, MAX_WEIGHT};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Share of the ranking score taken by the passage's editorial weight.
const PRIOR_SHARE: f32 = 0.5;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z0-9]+(?:'[a-z]+)?").expect("valid word regex");
    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for",
        "from", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my",
        "of", "on", "or", "our", "should", "so", "that", "the", "their", "them", "there",
        "they", "this", "to", "was", "we", "what", "when", "where", "which", "who", "why",
        "will", "with", "would", "you", "your", "i'm", "it's", "am", "about", "not", "all",
    ]
    .into_iter()
    .collect();
}

/// Lowercased content words of a text, stopwords removed.
pub fn content_words(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Fraction of query words present, as whole words, in the passage.
pub fn keyword_overlap(query: &HashSet<String>, passage: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let hits = query.iter().filter(|w| passage.contains(*w)).count();
    hits as f32 / query.len() as f32
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Cosine similarity; zero for mismatched or empty vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("embedding call failed: {0}")]
    Failed(String),
}

/// Produces a vector for a piece of text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// In-process feature-hashing embedder. Deterministic, offline, and good
/// enough to rank passages sharing vocabulary with the question.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMS: usize = 256;

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    fn id(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; self.dims];
        for word in content_words(text) {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let h = hasher.finish();
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            vector[(h >> 1) as usize % self.dims] += sign;
        }
        Ok(vector)
    }
}

// ============================================================================
// Retrieval
// ============================================================================

/// Why retrieval ran on keywords alone. Logged, never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RetrievalDegradation {
    EmbeddingTimeout,
    EmbeddingFailed(String),
}

/// A scored passage and the key it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub id: String,
    pub key: String,
    pub text: String,
    /// Ranking score: relevance blended with editorial weight.
    pub score: f32,
    /// Question relevance; the threshold applies to this alone.
    pub relevance: f32,
    pub keyword_score: f32,
    pub semantic_score: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalOutcome {
    /// Best first.
    pub passages: Vec<RetrievedPassage>,
    /// Distinct candidates considered before threshold and top-N.
    pub candidates: usize,
    pub semantic_used: bool,
    pub degraded: Option<RetrievalDegradation>,
}

/// Scores knowledge-base passages for a set of pattern keys.
#[derive(Clone)]
pub struct Retriever {
    kb: Arc<KnowledgeBase>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(kb: Arc<KnowledgeBase>, config: RetrievalConfig) -> Self {
        Self {
            kb,
            embedder: None,
            config,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    async fn query_embedding(&self, query: &str) -> Result<Option<Vec<f32>>, RetrievalDegradation> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        let limit = Duration::from_millis(self.config.embedding_timeout_ms);
        match tokio::time::timeout(limit, embedder.embed(query)).await {
            Ok(Ok(v)) => Ok(Some(v)),
            Ok(Err(e)) => Err(RetrievalDegradation::EmbeddingFailed(e.to_string())),
            Err(_) => Err(RetrievalDegradation::EmbeddingTimeout),
        }
    }

    /// Retrieve the top passages for the given keys.
    pub async fn retrieve(&self, keys: &[String], query: &str) -> RetrievalOutcome {
        let mut outcome = RetrievalOutcome::default();

        let query_vector = match self.query_embedding(query).await {
            Ok(v) => v,
            Err(reason) => {
                tracing::warn!(?reason, "embedding unavailable, using keyword scoring only");
                outcome.degraded = Some(reason);
                None
            }
        };
        outcome.semantic_used = query_vector.is_some();

        let query_words = content_words(query);
        let semantic_weight = self.config.semantic_weight.clamp(0.0, 1.0);

        // Best-scoring key per passage; a passage may answer several keys.
        let mut best: HashMap<usize, RetrievedPassage> = HashMap::new();
        for key in keys {
            for (idx, passage) in self.kb.tagged(key) {
                let words = content_words(&passage.text);
                let keyword_score = keyword_overlap(&query_words, &words);
                let semantic_score = match (&query_vector, &passage.embedding) {
                    (Some(q), Some(p)) => Some(cosine(q, p).max(0.0)),
                    _ => None,
                };
                let relevance = match semantic_score {
                    Some(s) => (1.0 - semantic_weight) * keyword_score + semantic_weight * s,
                    None => keyword_score,
                };
                let prior = passage.weight.clamp(0.0, MAX_WEIGHT) / MAX_WEIGHT;
                let score = PRIOR_SHARE * prior + (1.0 - PRIOR_SHARE) * relevance;

                let candidate = RetrievedPassage {
                    id: passage.id.clone(),
                    key: key.clone(),
                    text: passage.text.clone(),
                    score,
                    relevance,
                    keyword_score,
                    semantic_score,
                };
                match best.get(&idx) {
                    Some(existing) if existing.score >= candidate.score => {}
                    _ => {
                        best.insert(idx, candidate);
                    }
                }
            }
        }
        outcome.candidates = best.len();

        let mut ranked: Vec<RetrievedPassage> = best
            .into_values()
            .filter(|p| p.relevance > 0.0 && p.relevance >= self.config.min_relevance)
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        let mut kept: Vec<(RetrievedPassage, HashSet<String>)> = Vec::new();
        for passage in ranked {
            let words = content_words(&passage.text);
            if kept
                .iter()
                .any(|(_, seen)| jaccard(seen, &words) >= self.config.dedup_threshold)
            {
                tracing::debug!(passage = %passage.id, "dropping near-duplicate passage");
                continue;
            }
            kept.push((passage, words));
            if kept.len() >= self.config.top_n {
                break;
            }
        }
        outcome.passages = kept.into_iter().map(|(p, _)| p).collect();

        tracing::debug!(
            keys = keys.len(),
            candidates = outcome.candidates,
            returned = outcome.passages.len(),
            semantic = outcome.semantic_used,
            "retrieval complete"
        );
        outcome
    }
}
