//! Quality gate.
//!
//! Every narrative ends in one of two states: PASS or BLOCKED with a reason.
//! Structural checks run first and cap what the rubric may award; the rubric
//! comes from rules or from a model judge. When the judge itself fails the
//! configured policy decides: fail-open falls back to rule scores, while
//! fail-closed blocks.

pub mod judge;
pub mod rubric;
pub mod structure;

pub use judge::{EvaluatorError, Judge, JudgeInput, ModelJudge};
pub use rubric::{EvalResult, QuerentContext};
pub use structure::{mentioned_cards, mentions, Mention, StructuralReport};

use ::claude::Claude;
use crate::backend::ExpectedCard;
use crate::config::{EvalMode, GateConfig, OnEvalError};
use crate::deck_style::DeckStyle;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a narrative was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    SafetyScoreLow,
    SafetyFlag,
    ToneScoreLow,
    EvaluatorUnavailable,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::SafetyScoreLow => "safety_score_low",
            BlockReason::SafetyFlag => "safety_flag",
            BlockReason::ToneScoreLow => "tone_score_low",
            BlockReason::EvaluatorUnavailable => "evaluator_unavailable",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BlockReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GateDecision::Blocked(_))
    }

    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            GateDecision::Blocked(reason) => Some(*reason),
            GateDecision::Pass => None,
        }
    }
}

/// Apply the blocking rule to rubric scores.
pub fn decide(eval: &EvalResult) -> GateDecision {
    if eval.safety < 2 {
        GateDecision::Blocked(BlockReason::SafetyScoreLow)
    } else if eval.safety_flag {
        GateDecision::Blocked(BlockReason::SafetyFlag)
    } else if eval.tone < 2 {
        GateDecision::Blocked(BlockReason::ToneScoreLow)
    } else {
        GateDecision::Pass
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Evaluation cancelled")]
pub struct EvaluationCancelled;

/// A narrative to evaluate.
#[derive(Debug, Clone)]
pub struct GateInput<'a> {
    pub text: &'a str,
    pub expected: &'a [ExpectedCard],
    pub style: DeckStyle,
    pub querent: QuerentContext<'a>,
}

/// Everything the gate concluded.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub eval: EvalResult,
    pub structure: StructuralReport,
    /// Mode whose scores were used.
    pub mode: EvalMode,
    /// False when the gate is disabled and scores are informational only.
    pub enforced: bool,
    pub evaluator_error: Option<String>,
}

pub struct QualityGate {
    config: GateConfig,
    judge: Option<Arc<dyn Judge>>,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            judge: None,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Build from configuration, constructing a model judge from
    /// `ANTHROPIC_API_KEY` when model mode is selected.
    pub fn from_config(config: GateConfig) -> Self {
        let mut gate = Self::new(config);
        if gate.config.mode == EvalMode::Model {
            match Claude::from_env() {
                Ok(client) => {
                    let client = client.with_model(gate.config.judge_model.clone());
                    gate = gate.with_judge(Arc::new(ModelJudge::new(client)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Model judge unavailable; evaluator errors will follow policy");
                }
            }
        }
        gate
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Evaluate a narrative. Only cancellation is an error; evaluator
    /// failures are resolved by policy.
    pub async fn evaluate(
        &self,
        input: &GateInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<GateOutcome, EvaluationCancelled> {
        let structure = StructuralReport::check(input.text, input.expected, input.style);
        let rule_eval = rubric::score(input.text, &input.querent, &structure);

        if !self.config.enabled {
            return Ok(GateOutcome {
                decision: GateDecision::Pass,
                eval: rule_eval,
                structure,
                mode: EvalMode::RuleBased,
                enforced: false,
                evaluator_error: None,
            });
        }

        let (eval, mode, evaluator_error) = match self.config.mode {
            EvalMode::RuleBased => (rule_eval, EvalMode::RuleBased, None),
            EvalMode::Model => match self.run_judge(input, cancel).await? {
                Ok(mut eval) => {
                    eval.apply_structure(&structure);
                    (eval, EvalMode::Model, None)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        policy = ?self.config.on_eval_error,
                        "Evaluator failed"
                    );
                    if self.config.on_eval_error == OnEvalError::FailClosed {
                        return Ok(GateOutcome {
                            decision: GateDecision::Blocked(BlockReason::EvaluatorUnavailable),
                            eval: rule_eval,
                            structure,
                            mode: EvalMode::Model,
                            enforced: true,
                            evaluator_error: Some(e.to_string()),
                        });
                    }
                    (rule_eval, EvalMode::RuleBased, Some(e.to_string()))
                }
            },
        };

        let decision = decide(&eval);
        if let GateDecision::Blocked(reason) = decision {
            tracing::warn!(
                reason = %reason,
                safety = eval.safety,
                tone = eval.tone,
                hallucinated = ?structure.hallucinated_cards,
                "Narrative blocked"
            );
        }
        Ok(GateOutcome {
            decision,
            eval,
            structure,
            mode,
            enforced: true,
            evaluator_error,
        })
    }

    async fn run_judge(
        &self,
        input: &GateInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<Result<EvalResult, EvaluatorError>, EvaluationCancelled> {
        let Some(judge) = &self.judge else {
            return Ok(Err(EvaluatorError::Api("no judge configured".to_string())));
        };
        let judge_input = JudgeInput {
            question: input.querent.question,
            expected: input.expected,
            narrative: input.text,
        };
        let timeout = Duration::from_millis(self.config.judge_timeout_ms);
        tokio::select! {
            _ = cancel.cancelled() => Err(EvaluationCancelled),
            result = tokio::time::timeout(timeout, judge.judge(&judge_input)) => Ok(match result {
                Ok(judged) => judged,
                Err(_) => Err(EvaluatorError::Timeout { after_ms: self.config.judge_timeout_ms }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{three_card_expected, MockJudge};

    const GOOD: &str = "In the past position, the Three of Cups shows friendship. In the \
                        present position, the Four of Cups asks you to look again. In the \
                        future position, the Five of Cups, reversed, speaks of recovery. \
                        Together they invite you to choose what to carry forward.";

    fn input<'a>(text: &'a str, expected: &'a [ExpectedCard]) -> GateInput<'a> {
        GateInput {
            text,
            expected,
            style: DeckStyle::RiderWaite,
            querent: QuerentContext {
                question: "What should I carry forward?",
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_decide_order() {
        assert_eq!(decide(&EvalResult::new(4, 4, 4, 4)), GateDecision::Pass);
        assert_eq!(
            decide(&EvalResult::new(4, 4, 1, 1).with_safety_flag(true)),
            GateDecision::Blocked(BlockReason::SafetyScoreLow)
        );
        assert_eq!(
            decide(&EvalResult::new(4, 4, 1, 4).with_safety_flag(true)),
            GateDecision::Blocked(BlockReason::SafetyFlag)
        );
        assert_eq!(
            decide(&EvalResult::new(4, 4, 1, 4)),
            GateDecision::Blocked(BlockReason::ToneScoreLow)
        );
    }

    #[tokio::test]
    async fn test_rule_based_pass() {
        let expected = three_card_expected();
        let gate = QualityGate::new(GateConfig::default());
        let outcome = gate
            .evaluate(&input(GOOD, &expected), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision, GateDecision::Pass);
        assert_eq!(outcome.structure.coverage, 1.0);
        assert!(outcome.enforced);
    }

    #[tokio::test]
    async fn test_model_scores_are_capped() {
        let expected = three_card_expected();
        let gate = QualityGate::new(GateConfig::default().with_mode(EvalMode::Model))
            .with_judge(Arc::new(MockJudge::scores(EvalResult::new(5, 5, 5, 5))));
        let text = format!("{GOOD} The Tower looms.");
        let outcome = gate
            .evaluate(&input(&text, &expected), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.mode, EvalMode::Model);
        assert!(outcome.eval.tarot_coherence <= 2);
        assert!(outcome.eval.safety_flag);
        assert_eq!(outcome.decision, GateDecision::Blocked(BlockReason::SafetyFlag));
    }

    #[tokio::test]
    async fn test_judge_safety_one_blocks() {
        let expected = three_card_expected();
        let gate = QualityGate::new(GateConfig::default().with_mode(EvalMode::Model))
            .with_judge(Arc::new(MockJudge::scores(EvalResult::new(4, 4, 4, 1))));
        let outcome = gate
            .evaluate(&input(GOOD, &expected), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision.reason(), Some(BlockReason::SafetyScoreLow));
    }

    #[tokio::test]
    async fn test_fail_open_uses_rule_scores() {
        let expected = three_card_expected();
        let gate = QualityGate::new(
            GateConfig::default()
                .with_mode(EvalMode::Model)
                .with_on_eval_error(OnEvalError::FailOpen),
        )
        .with_judge(Arc::new(MockJudge::failing()));
        let outcome = gate
            .evaluate(&input(GOOD, &expected), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision, GateDecision::Pass);
        assert_eq!(outcome.mode, EvalMode::RuleBased);
        assert!(outcome.evaluator_error.is_some());
    }

    #[tokio::test]
    async fn test_fail_closed_blocks() {
        let expected = three_card_expected();
        let gate = QualityGate::new(
            GateConfig::default()
                .with_mode(EvalMode::Model)
                .with_on_eval_error(OnEvalError::FailClosed),
        )
        .with_judge(Arc::new(MockJudge::failing()));
        let outcome = gate
            .evaluate(&input(GOOD, &expected), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.decision,
            GateDecision::Blocked(BlockReason::EvaluatorUnavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_judge_timeout_follows_policy() {
        let expected = three_card_expected();
        let mut config = GateConfig::default()
            .with_mode(EvalMode::Model)
            .with_on_eval_error(OnEvalError::FailClosed);
        config.judge_timeout_ms = 50;
        let gate = QualityGate::new(config).with_judge(Arc::new(MockJudge::delayed(
            Duration::from_secs(30),
        )));
        let outcome = gate
            .evaluate(&input(GOOD, &expected), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.decision.is_blocked());
        assert!(outcome
            .evaluator_error
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_disabled_gate_never_blocks() {
        let expected = three_card_expected();
        let gate = QualityGate::new(GateConfig::default().with_enabled(false));
        let outcome = gate
            .evaluate(
                &input("You are doomed. There is no hope.", &expected),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision, GateDecision::Pass);
        assert!(!outcome.enforced);
    }

    #[tokio::test]
    async fn test_cancel_during_judge() {
        let expected = three_card_expected();
        let gate = QualityGate::new(GateConfig::default().with_mode(EvalMode::Model))
            .with_judge(Arc::new(MockJudge::delayed(Duration::from_secs(30))));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = gate.evaluate(&input(GOOD, &expected), &cancel).await;
        assert_eq!(result.unwrap_err(), EvaluationCancelled);
    }
}
