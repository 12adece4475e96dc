//! Per-request metrics records.
//!
//! One record per completed request, written after redaction whether the
//! reading passed or was blocked. Sinks never fail a request: write errors
//! are logged and dropped.

use crate::gate::GateOutcome;
use crate::prompt::redact::Redactor;
use crate::prompt::PromptMeta;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rubric scores as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedScores {
    pub personalization: u8,
    pub tarot_coherence: u8,
    pub tone: u8,
    pub safety: u8,
    pub overall: u8,
}

/// One persisted record. Free text is redacted before it gets here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub reading: String,
    pub scores: RecordedScores,
    pub safety_flag: bool,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub gate_enforced: bool,
    pub card_coverage: f32,
    pub missing_cards: Vec<String>,
    pub hallucinated_cards: Vec<String>,
    pub missing_positions: Vec<String>,
    pub provider: String,
    pub prompt_version: String,
    pub eval_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator_error: Option<String>,
    pub prompt_tokens: usize,
    pub prompt_truncated: bool,
    pub prompt_slimmed: bool,
}

impl MetricsRecord {
    /// Build a record, redacting the question and reading text.
    pub fn build(
        request_id: &str,
        question: &str,
        reading: &str,
        provider: &str,
        prompt: &PromptMeta,
        gate: &GateOutcome,
        redactor: &Redactor,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            question: redactor.redact(question),
            reading: redactor.redact(reading),
            scores: RecordedScores {
                personalization: gate.eval.personalization,
                tarot_coherence: gate.eval.tarot_coherence,
                tone: gate.eval.tone,
                safety: gate.eval.safety,
                overall: gate.eval.overall,
            },
            safety_flag: gate.eval.safety_flag,
            blocked: gate.decision.is_blocked(),
            block_reason: gate.decision.reason().map(|r| r.as_str().to_string()),
            gate_enforced: gate.enforced,
            card_coverage: gate.structure.coverage,
            missing_cards: gate.structure.missing_cards.clone(),
            hallucinated_cards: gate.structure.hallucinated_cards.clone(),
            missing_positions: gate.structure.missing_positions.clone(),
            provider: provider.to_string(),
            prompt_version: prompt.prompt_version.clone(),
            eval_mode: gate.mode.as_str().to_string(),
            evaluator_error: gate.evaluator_error.clone(),
            prompt_tokens: prompt.estimated_tokens,
            prompt_truncated: prompt.truncated,
            prompt_slimmed: prompt.slimmed,
        }
    }
}

/// Destination for metrics records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, record: &MetricsRecord) -> Result<(), MetricsError>;
}

/// Appends records as JSON lines to a file.
pub struct JsonlMetricsSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn write(&self, record: &MetricsRecord) -> Result<(), MetricsError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Discards every record.
pub struct NullMetricsSink;

#[async_trait]
impl MetricsSink for NullMetricsSink {
    async fn write(&self, _record: &MetricsRecord) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// Write a record, logging instead of failing.
pub(crate) async fn record(sink: &dyn MetricsSink, record: &MetricsRecord) {
    match sink.write(record).await {
        Ok(()) => tracing::debug!(request_id = %record.request_id, "Metrics recorded"),
        Err(e) => {
            tracing::warn!(request_id = %record.request_id, error = %e, "Failed to write metrics")
        }
    }
}

/// Read back a JSON-lines metrics file.
pub async fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<MetricsRecord>, MetricsError> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(MetricsError::from))
        .collect()
}
