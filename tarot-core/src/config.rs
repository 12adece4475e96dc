//! Reading pipeline configuration.
//!
//! Everything has a default, so an empty JSON object or no environment at
//! all yields a working local-only pipeline. Environment variables overlay
//! the defaults (or a JSON file named by `TAROT_CONFIG`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

// ============================================================================
// Backends
// ============================================================================

/// Which implementation fills a backend slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Claude,
    OpenaiCompatible,
    Local,
}

/// One slot in the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Identifier reported as the response's provider.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

/// Base URL of the hosted OpenAI API, the default secondary backend.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn default_backend_timeout_ms() -> u64 {
    30_000
}

impl BackendConfig {
    pub fn claude(id: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Claude,
            id: id.into(),
            model: None,
            base_url: None,
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            timeout_ms: default_backend_timeout_ms(),
        }
    }

    pub fn openai_compatible(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::OpenaiCompatible,
            id: id.into(),
            model: None,
            base_url: Some(base_url.into()),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_ms: default_backend_timeout_ms(),
        }
    }

    pub fn local() -> Self {
        Self {
            kind: BackendKind::Local,
            id: "local".to_string(),
            model: None,
            base_url: None,
            api_key_env: None,
            timeout_ms: 5_000,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_n: usize,
    /// Passages whose question relevance falls below this are dropped.
    pub min_relevance: f32,
    /// Share of the relevance signal taken by semantic similarity.
    pub semantic_weight: f32,
    /// Token-set Jaccard at or above which two passages are duplicates.
    pub dedup_threshold: f32,
    pub embedding_timeout_ms: u64,
    /// Use the in-process hashing embedder for semantic scoring.
    pub hashing_embedder: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_relevance: 0.3,
            semantic_weight: 0.4,
            dedup_threshold: 0.9,
            embedding_timeout_ms: 2_000,
            hashing_embedder: false,
        }
    }
}

impl RetrievalConfig {
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f32) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    pub fn with_embedding_timeout_ms(mut self, ms: u64) -> Self {
        self.embedding_timeout_ms = ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub slimming_enabled: bool,
    pub soft_budget_tokens: usize,
    /// Absolute ceiling, enforced whether or not slimming is enabled.
    pub hard_cap_tokens: usize,
    pub prompt_version: String,
    pub max_output_tokens: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            slimming_enabled: false,
            soft_budget_tokens: 1_800,
            hard_cap_tokens: 3_000,
            prompt_version: "reading-v3".to_string(),
            max_output_tokens: 1_200,
        }
    }
}

impl PromptConfig {
    pub fn with_slimming(mut self, enabled: bool) -> Self {
        self.slimming_enabled = enabled;
        self
    }

    pub fn with_soft_budget(mut self, tokens: usize) -> Self {
        self.soft_budget_tokens = tokens;
        self
    }

    pub fn with_hard_cap(mut self, tokens: usize) -> Self {
        self.hard_cap_tokens = tokens;
        self
    }
}

/// How the gate produces rubric scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    #[default]
    RuleBased,
    Model,
}

impl EvalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalMode::RuleBased => "rule_based",
            EvalMode::Model => "model",
        }
    }
}

/// What the gate does when the evaluator itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnEvalError {
    #[default]
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub enabled: bool,
    pub mode: EvalMode,
    pub on_eval_error: OnEvalError,
    pub judge_model: String,
    pub judge_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: EvalMode::RuleBased,
            on_eval_error: OnEvalError::FailOpen,
            judge_model: "claude-3-5-haiku-20241022".to_string(),
            judge_timeout_ms: 10_000,
        }
    }
}

impl GateConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_on_eval_error(mut self, policy: OnEvalError) -> Self {
        self.on_eval_error = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// JSONL file to append records to. No path, no file sink.
    pub path: Option<PathBuf>,
}

// ============================================================================
// Top level
// ============================================================================

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    /// Fallback chain in order. A local slot is appended if none is listed.
    /// Defaults to Claude, then OpenAI, then the local composer; remote slots
    /// whose API key is unset are skipped when the chain is built.
    pub backends: Vec<BackendConfig>,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
    pub gate: GateConfig,
    pub metrics: MetricsConfig,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                BackendConfig::claude("claude"),
                BackendConfig::openai_compatible("openai", OPENAI_BASE_URL),
                BackendConfig::local(),
            ],
            retrieval: RetrievalConfig::default(),
            prompt: PromptConfig::default(),
            gate: GateConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ReadingConfig {
    pub fn with_backends(mut self, backends: Vec<BackendConfig>) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics.path = Some(path.into());
        self
    }

    /// Load from a JSON file. Missing sections take their defaults.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Defaults (or `TAROT_CONFIG`) overlaid with `TAROT_*` variables.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let base = match std::env::var("TAROT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_json_file(path.trim()).await?,
            _ => Self::default(),
        };
        base.overlay(|var| std::env::var(var).ok())
    }

    /// Apply `TAROT_*` overrides from any lookup.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TAROT_PROMPT_SLIMMING") {
            self.prompt.slimming_enabled = parse_bool("TAROT_PROMPT_SLIMMING", &v)?;
        }
        if let Some(v) = lookup("TAROT_SOFT_BUDGET") {
            self.prompt.soft_budget_tokens = parse_num("TAROT_SOFT_BUDGET", &v)?;
        }
        if let Some(v) = lookup("TAROT_HARD_CAP") {
            self.prompt.hard_cap_tokens = parse_num("TAROT_HARD_CAP", &v)?;
        }
        if let Some(v) = lookup("TAROT_EVAL_GATE") {
            self.gate.enabled = parse_bool("TAROT_EVAL_GATE", &v)?;
        }
        if let Some(v) = lookup("TAROT_EVAL_MODE") {
            self.gate.mode = match v.trim().to_lowercase().as_str() {
                "rule_based" | "rule-based" | "rules" => EvalMode::RuleBased,
                "model" | "judge" => EvalMode::Model,
                _ => return Err(invalid("TAROT_EVAL_MODE", &v)),
            };
        }
        if let Some(v) = lookup("TAROT_ON_EVAL_ERROR") {
            self.gate.on_eval_error = match v.trim().to_lowercase().as_str() {
                "fail_open" | "fail-open" | "open" => OnEvalError::FailOpen,
                "fail_closed" | "fail-closed" | "closed" => OnEvalError::FailClosed,
                _ => return Err(invalid("TAROT_ON_EVAL_ERROR", &v)),
            };
        }
        if let Some(v) = lookup("TAROT_METRICS_PATH") {
            self.metrics.path = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v.trim()))
            };
        }
        Ok(self)
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value)),
    }
}

fn parse_num(var: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| invalid(var, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ReadingConfig::default();
        let chain: Vec<(BackendKind, &str)> = config
            .backends
            .iter()
            .map(|b| (b.kind, b.id.as_str()))
            .collect();
        assert_eq!(
            chain,
            vec![
                (BackendKind::Claude, "claude"),
                (BackendKind::OpenaiCompatible, "openai"),
                (BackendKind::Local, "local"),
            ]
        );
        assert_eq!(config.backends[1].base_url.as_deref(), Some(OPENAI_BASE_URL));
        assert!(!config.prompt.slimming_enabled);
        assert!(config.gate.enabled);
        assert_eq!(config.gate.on_eval_error, OnEvalError::FailOpen);
        assert!(config.metrics.path.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ReadingConfig = serde_json::from_str(
            r#"{"gate": {"on_eval_error": "fail_closed"}, "prompt": {"hard_cap_tokens": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.gate.on_eval_error, OnEvalError::FailClosed);
        assert!(config.gate.enabled);
        assert_eq!(config.prompt.hard_cap_tokens, 500);
        assert_eq!(config.prompt.soft_budget_tokens, 1_800);
        assert_eq!(config.retrieval, RetrievalConfig::default());
    }

    #[test]
    fn test_backend_json() {
        let config: ReadingConfig = serde_json::from_str(
            r#"{"backends": [
                {"kind": "openai_compatible", "id": "groq", "base_url": "https://api.groq.com/openai/v1", "model": "llama"},
                {"kind": "local", "id": "local"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.backends[0].kind, BackendKind::OpenaiCompatible);
        assert_eq!(config.backends[0].timeout_ms, 30_000);
        assert_eq!(config.backends[1].kind, BackendKind::Local);
    }

    #[test]
    fn test_env_overlay() {
        let config = ReadingConfig::default()
            .overlay(lookup(&[
                ("TAROT_PROMPT_SLIMMING", "true"),
                ("TAROT_HARD_CAP", "900"),
                ("TAROT_EVAL_MODE", "model"),
                ("TAROT_ON_EVAL_ERROR", "fail-closed"),
                ("TAROT_METRICS_PATH", "/tmp/metrics.jsonl"),
            ]))
            .unwrap();
        assert!(config.prompt.slimming_enabled);
        assert_eq!(config.prompt.hard_cap_tokens, 900);
        assert_eq!(config.gate.mode, EvalMode::Model);
        assert_eq!(config.gate.on_eval_error, OnEvalError::FailClosed);
        assert_eq!(
            config.metrics.path.as_deref(),
            Some(Path::new("/tmp/metrics.jsonl"))
        );
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let err = ReadingConfig::default()
            .overlay(lookup(&[("TAROT_EVAL_GATE", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "TAROT_EVAL_GATE"));
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tarot.json");
        tokio::fs::write(&path, r#"{"retrieval": {"top_n": 2}}"#)
            .await
            .unwrap();
        let config = ReadingConfig::from_json_file(&path).await.unwrap();
        assert_eq!(config.retrieval.top_n, 2);

        let missing = ReadingConfig::from_json_file(dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
