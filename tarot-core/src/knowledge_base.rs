//! Curated passage corpus.
//!
//! Loaded once per process into an arena of passages plus an index by tag,
//! then shared read-only behind an `Arc`. Fixture corpora for tests go
//! through [`KnowledgeBase::from_json`].

use crate::retrieval::EmbeddingBackend;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Corpus compiled into the crate.
const EMBEDDED_CORPUS: &str = include_str!("../data/knowledge_base.json");

/// Errors from loading a corpus.
#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("Failed to parse knowledge base: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate passage id: {0}")]
    DuplicateId(String),

    #[error("Passage {0} has no text")]
    EmptyPassage(String),

    #[error("Passage {0} has no tags")]
    Untagged(String),
}

/// Ceiling for a passage's editorial weight. Curated triad passages sit here.
pub const MAX_WEIGHT: f32 = 1.2;

fn default_weight() -> f32 {
    1.0
}

/// One reference passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    /// Pattern keys this passage answers.
    pub tags: Vec<String>,
    /// Editorial prior in `0..=MAX_WEIGHT`. Ranks passages that are
    /// already relevant; never counts toward relevance itself.
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct CorpusFile {
    passages: Vec<Passage>,
}

/// Index into the passage arena.
pub type PassageIdx = usize;

/// Arena of passages plus tag index.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    passages: Vec<Passage>,
    by_tag: HashMap<String, Vec<PassageIdx>>,
}

impl KnowledgeBase {
    /// Build from passages, validating ids, text and tags.
    pub fn new(passages: Vec<Passage>) -> Result<Self, KnowledgeBaseError> {
        let mut seen = HashSet::new();
        let mut by_tag: HashMap<String, Vec<PassageIdx>> = HashMap::new();

        for (idx, passage) in passages.iter().enumerate() {
            if !seen.insert(passage.id.as_str()) {
                return Err(KnowledgeBaseError::DuplicateId(passage.id.clone()));
            }
            if passage.text.trim().is_empty() {
                return Err(KnowledgeBaseError::EmptyPassage(passage.id.clone()));
            }
            if passage.tags.is_empty() {
                return Err(KnowledgeBaseError::Untagged(passage.id.clone()));
            }
            for tag in &passage.tags {
                by_tag.entry(tag.clone()).or_default().push(idx);
            }
        }

        Ok(Self { passages, by_tag })
    }

    /// Parse a corpus in the `{"passages": [...]}` format.
    pub fn from_json(json: &str) -> Result<Self, KnowledgeBaseError> {
        let corpus: CorpusFile = serde_json::from_str(json)?;
        Self::new(corpus.passages)
    }

    /// The corpus shipped with the crate.
    pub fn embedded() -> Result<Self, KnowledgeBaseError> {
        let kb = Self::from_json(EMBEDDED_CORPUS)?;
        tracing::debug!(
            passages = kb.len(),
            tags = kb.by_tag.len(),
            "loaded embedded knowledge base"
        );
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn get(&self, idx: PassageIdx) -> Option<&Passage> {
        self.passages.get(idx)
    }

    pub fn find(&self, id: &str) -> Option<&Passage> {
        self.passages.iter().find(|p| p.id == id)
    }

    /// Passages tagged with a key, in corpus order.
    pub fn tagged(&self, key: &str) -> impl Iterator<Item = (PassageIdx, &Passage)> {
        self.by_tag
            .get(key)
            .into_iter()
            .flatten()
            .map(|idx| (*idx, &self.passages[*idx]))
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.by_tag.contains_key(key)
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Fill in missing passage embeddings. Done once at startup, before the
    /// corpus is shared.
    pub async fn precompute_embeddings(
        &mut self,
        embedder: &dyn EmbeddingBackend,
    ) -> Result<usize, crate::retrieval::EmbeddingError> {
        let mut filled = 0;
        for passage in self.passages.iter_mut().filter(|p| p.embedding.is_none()) {
            passage.embedding = Some(embedder.embed(&passage.text).await?);
            filled += 1;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::all_pattern_keys;

    #[test]
    fn test_embedded_corpus_loads() {
        let kb = KnowledgeBase::embedded().unwrap();
        assert!(kb.len() >= 40);
        assert!(kb.has_tag("suit-progression:cups:beginnings"));
    }

    #[test]
    fn test_every_pattern_key_has_a_passage() {
        let kb = KnowledgeBase::embedded().unwrap();
        for key in all_pattern_keys() {
            assert!(kb.has_tag(&key), "no passage for {key}");
        }
    }

    #[test]
    fn test_tag_index() {
        let kb = KnowledgeBase::from_json(
            r#"{"passages": [
                {"id": "a", "text": "first", "tags": ["x", "y"]},
                {"id": "b", "text": "second", "tags": ["y"], "weight": 0.5}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<_> = kb.tagged("y").map(|(_, p)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(kb.tagged("z").count(), 0);
        assert_eq!(kb.find("a").unwrap().weight, 1.0);
        assert_eq!(kb.find("b").unwrap().weight, 0.5);
    }

    #[test]
    fn test_rejects_bad_corpora() {
        let dup = r#"{"passages": [
            {"id": "a", "text": "one", "tags": ["x"]},
            {"id": "a", "text": "two", "tags": ["x"]}
        ]}"#;
        assert!(matches!(
            KnowledgeBase::from_json(dup),
            Err(KnowledgeBaseError::DuplicateId(_))
        ));

        let untagged = r#"{"passages": [{"id": "a", "text": "one", "tags": []}]}"#;
        assert!(matches!(
            KnowledgeBase::from_json(untagged),
            Err(KnowledgeBaseError::Untagged(_))
        ));

        assert!(matches!(
            KnowledgeBase::from_json("not json"),
            Err(KnowledgeBaseError::Parse(_))
        ));
    }
}
