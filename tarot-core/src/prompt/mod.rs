//! Prompt assembly.
//!
//! Merges the spread analysis, pattern matches, retrieved passages, the
//! querent's question and their preferences into one system block and one
//! user block, then bounds the result:
//!
//! 1. Optional slimming: ordered [`ReductionStep`]s run until the draft fits
//!    the soft budget.
//! 2. Hard cap: always runs last. Truncation and the token estimate are
//!    recorded in [`PromptMeta`] on every request, slimming or not.

pub mod redact;
pub mod reduction;

pub use redact::Redactor;
pub use reduction::{
    default_steps, DropPassages, HardCap, ReductionStep, StepReport, TrimPersonalization,
    TrimRelationshipProse, Truncation,
};

use crate::analysis::SpreadAnalysis;
use crate::config::PromptConfig;
use crate::patterns::PatternMatch;
use crate::request::{ReadingRequest, ReversalLens};
use crate::retrieval::{RetrievalOutcome, RetrievedPassage};
use crate::spread::Spread;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// The two blocks sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system) + estimate_tokens(&self.user)
    }
}

/// Structured prompt before rendering. Reduction steps remove items from
/// the droppable sections; spread and question are never dropped.
#[derive(Debug, Clone, Default)]
pub struct PromptDraft {
    pub system: String,
    pub question: String,
    pub reflections: Option<String>,
    pub spread: Vec<String>,
    pub lens: Option<String>,
    pub relationships: Vec<String>,
    pub dignities: Vec<String>,
    pub patterns: Vec<String>,
    /// Best first.
    pub passages: Vec<RetrievedPassage>,
    /// Tone line first; trimming keeps it.
    pub personalization: Vec<String>,
}

impl PromptDraft {
    pub fn render(&self) -> Prompt {
        let mut user = String::new();
        let _ = writeln!(user, "Question: {}", self.question.trim());
        if let Some(reflections) = self.reflections.as_deref().filter(|r| !r.trim().is_empty()) {
            let _ = writeln!(user, "Reflections: {}", reflections.trim());
        }

        section(&mut user, "Spread", &self.spread, "");
        if let Some(lens) = &self.lens {
            let _ = writeln!(user, "\nReversals: {lens}");
        }
        section(&mut user, "Card relationships", &self.relationships, "- ");
        section(&mut user, "Elemental dignities", &self.dignities, "- ");
        section(&mut user, "Archetypal patterns", &self.patterns, "- ");

        if !self.passages.is_empty() {
            user.push_str("\nReference notes:\n");
            for passage in &self.passages {
                let _ = writeln!(user, "[{}] {}", passage.key, passage.text);
            }
        }
        section(&mut user, "Reader preferences", &self.personalization, "- ");

        user.push_str(
            "\nWrite the reading. Address every position in order, naming its card, \
             then bring the cards together into one picture that answers the question.",
        );

        Prompt {
            system: self.system.clone(),
            user,
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        self.render().estimated_tokens()
    }
}

fn section(out: &mut String, title: &str, lines: &[String], bullet: &str) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{title}:");
    for line in lines {
        let _ = writeln!(out, "{bullet}{line}");
    }
}

/// Per-request bookkeeping for prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMeta {
    pub prompt_version: String,
    pub passages_retrieved: usize,
    pub passages_included: Vec<String>,
    pub slimming_enabled: bool,
    /// Whether any slimming step removed something.
    pub slimmed: bool,
    pub steps: Vec<StepReport>,
    pub truncated: bool,
    /// Estimate of the prompt as sent.
    pub estimated_tokens: usize,
    pub pre_truncation_tokens: usize,
}

/// Everything the assembler reads for one request.
pub struct AssemblyInput<'a> {
    pub request: &'a ReadingRequest,
    pub spread: &'a Spread,
    pub analysis: &'a SpreadAnalysis,
    pub patterns: &'a [PatternMatch],
    pub retrieval: &'a RetrievalOutcome,
    /// Lens applied to reversals, already resolved.
    pub lens: Option<ReversalLens>,
}

const SYSTEM_PROMPT: &str = "You are a thoughtful tarot reader. Ground every statement in the \
cards actually drawn: name each card exactly as listed and tie it to its position. Never \
mention a card that is not in the spread. Describe tendencies and possibilities, never fixed \
fate; the querent keeps their agency. Do not give medical, legal or financial advice, and do \
not predict death, illness or ruin. Synthesize the cards with one another rather than \
listing them in isolation.";

/// Builds bounded prompts.
#[derive(Clone)]
pub struct PromptAssembler {
    config: PromptConfig,
    steps: Vec<Arc<dyn ReductionStep>>,
}

impl PromptAssembler {
    pub fn new(config: PromptConfig) -> Self {
        Self {
            config,
            steps: default_steps().into_iter().map(Arc::from).collect(),
        }
    }

    /// Replace the slimming steps. The hard cap is not a step and always runs.
    pub fn with_steps(mut self, steps: Vec<Arc<dyn ReductionStep>>) -> Self {
        self.steps = steps;
        self
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Build the unbounded draft.
    pub fn draft(&self, input: &AssemblyInput<'_>) -> PromptDraft {
        let request = input.request;
        let style = input.spread.deck_style();

        let spread = input
            .analysis
            .cards
            .iter()
            .enumerate()
            .map(|(i, card)| {
                format!(
                    "{}. {}: {}{} ({})",
                    i + 1,
                    card.position,
                    card.display_name,
                    if card.reversed { ", reversed" } else { "" },
                    card.element
                )
            })
            .collect();

        let personal = &request.personalization;
        let mut personalization = vec![
            personal.tone.instruction().to_string(),
            personal.experience.instruction().to_string(),
        ];
        if !personal.focus_areas.is_empty() {
            personalization.push(format!("Focus areas: {}.", personal.focus_areas.join(", ")));
        }
        if let Some(name) = personal.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            personalization.push(format!("You may address the querent as {}.", name.trim()));
        }

        PromptDraft {
            system: SYSTEM_PROMPT.to_string(),
            question: request.question.clone(),
            reflections: request.reflections.clone(),
            spread,
            lens: input.lens.map(|l| l.instruction().to_string()),
            relationships: input.analysis.relationship_lines(style),
            dignities: input.analysis.adjacent_dignity_lines(),
            patterns: input.patterns.iter().map(|m| m.describe(style)).collect(),
            passages: input.retrieval.passages.clone(),
            personalization,
        }
    }

    /// Assemble, slim if enabled, and hard-cap.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> (Prompt, PromptMeta) {
        let (draft, steps) = self.slim(self.draft(input));
        let passages_included = draft.passages.iter().map(|p| p.id.clone()).collect();

        let (prompt, truncation) = HardCap::new(self.config.hard_cap_tokens).apply(draft.render());
        if truncation.truncated {
            tracing::warn!(
                before_tokens = truncation.before_tokens,
                after_tokens = truncation.after_tokens,
                cap = self.config.hard_cap_tokens,
                "prompt truncated at hard cap"
            );
        }

        let meta = PromptMeta {
            prompt_version: self.config.prompt_version.clone(),
            passages_retrieved: input.retrieval.passages.len(),
            passages_included,
            slimming_enabled: self.config.slimming_enabled,
            slimmed: steps.iter().any(|s| s.removed > 0),
            steps,
            truncated: truncation.truncated,
            estimated_tokens: truncation.after_tokens,
            pre_truncation_tokens: truncation.before_tokens,
        };
        tracing::debug!(
            tokens = meta.estimated_tokens,
            slimmed = meta.slimmed,
            truncated = meta.truncated,
            "prompt assembled"
        );
        (prompt, meta)
    }

    fn slim(&self, mut draft: PromptDraft) -> (PromptDraft, Vec<StepReport>) {
        let mut reports = Vec::new();
        if !self.config.slimming_enabled {
            return (draft, reports);
        }
        let budget = self.config.soft_budget_tokens;
        for step in &self.steps {
            if draft.estimated_tokens() <= budget {
                break;
            }
            let (next, report) = step.apply(draft, budget);
            draft = next;
            reports.push(report);
        }
        (draft, reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::deck_style::DeckStyle;
    use crate::patterns::PatternDetector;
    use crate::retrieval::RetrievedPassage;
    use crate::spread::DrawnCardInput;

    struct Fixture {
        request: ReadingRequest,
        spread: Spread,
        analysis: SpreadAnalysis,
        patterns: Vec<PatternMatch>,
        retrieval: RetrievalOutcome,
    }

    impl Fixture {
        fn new(passage_words: usize) -> Self {
            let cards = vec![
                DrawnCardInput::new("Past", "The Tower", false),
                DrawnCardInput::new("Present", "The Star", true),
                DrawnCardInput::new("Future", "The Sun", false),
            ];
            let request = ReadingRequest::new(cards.clone(), "How do I recover from this year?")
                .with_display_name("Alex");
            let spread = Spread::from_input(Some("three-card"), DeckStyle::RiderWaite, &cards).unwrap();
            let analysis = analyze(&spread);
            let patterns = PatternDetector::new().detect(&analysis);
            let retrieval = RetrievalOutcome {
                passages: (0..4)
                    .map(|i| RetrievedPassage {
                        id: format!("p{i}"),
                        key: "triad:healing-arc".to_string(),
                        text: "recovery ".repeat(passage_words),
                        score: 1.0 - i as f32 * 0.1,
                        relevance: 1.0 - i as f32 * 0.1,
                        keyword_score: 0.0,
                        semantic_score: None,
                    })
                    .collect(),
                ..Default::default()
            };
            Self {
                request,
                spread,
                analysis,
                patterns,
                retrieval,
            }
        }

        fn input(&self) -> AssemblyInput<'_> {
            AssemblyInput {
                request: &self.request,
                spread: &self.spread,
                analysis: &self.analysis,
                patterns: &self.patterns,
                retrieval: &self.retrieval,
                lens: None,
            }
        }
    }

    #[test]
    fn test_draft_contains_every_section() {
        let fixture = Fixture::new(5);
        let (prompt, meta) = PromptAssembler::new(PromptConfig::default()).assemble(&fixture.input());
        assert!(prompt.user.contains("1. Past: The Tower"));
        assert!(prompt.user.contains("2. Present: The Star, reversed"));
        assert!(prompt.user.contains("Healing Arc"));
        assert!(prompt.user.contains("[triad:healing-arc]"));
        assert!(prompt.user.contains("address the querent as Alex"));
        assert!(prompt.system.contains("Never mention a card"));
        assert!(!meta.truncated);
        assert_eq!(meta.passages_included.len(), 4);
        assert_eq!(meta.estimated_tokens, prompt.estimated_tokens());
    }

    #[test]
    fn test_slimming_drops_passages_first() {
        let fixture = Fixture::new(100);
        let config = PromptConfig::default()
            .with_slimming(true)
            .with_soft_budget(700)
            .with_hard_cap(10_000);
        let (_, meta) = PromptAssembler::new(config).assemble(&fixture.input());
        assert!(meta.slimmed);
        assert_eq!(meta.steps[0].step, "drop_passages");
        assert!(meta.passages_included.len() < 4);
        assert_eq!(meta.passages_retrieved, 4);
        // Best passages survive.
        assert!(meta.passages_included.iter().all(|id| id == "p0" || id == "p1" || id == "p2"));
        assert!(!meta.truncated);
        assert!(meta.estimated_tokens <= 700);
    }

    #[test]
    fn test_slimming_disabled_leaves_draft_alone() {
        let fixture = Fixture::new(100);
        let config = PromptConfig::default()
            .with_slimming(false)
            .with_soft_budget(100)
            .with_hard_cap(10_000);
        let (_, meta) = PromptAssembler::new(config).assemble(&fixture.input());
        assert!(!meta.slimmed);
        assert!(meta.steps.is_empty());
        assert_eq!(meta.passages_included.len(), 4);
    }

    #[test]
    fn test_truncation_recorded_without_slimming() {
        let fixture = Fixture::new(100);
        let config = PromptConfig::default().with_slimming(false).with_hard_cap(300);
        let (prompt, meta) = PromptAssembler::new(config).assemble(&fixture.input());
        assert!(meta.truncated);
        assert!(meta.pre_truncation_tokens > 300);
        assert!(meta.estimated_tokens <= 300);
        assert_eq!(meta.estimated_tokens, prompt.estimated_tokens());
    }

    #[test]
    fn test_truncation_recorded_with_slimming() {
        let fixture = Fixture::new(100);
        let config = PromptConfig::default()
            .with_slimming(true)
            .with_soft_budget(250)
            .with_hard_cap(150);
        let (_, meta) = PromptAssembler::new(config).assemble(&fixture.input());
        assert!(meta.slimmed);
        assert!(meta.truncated);
        assert!(meta.estimated_tokens <= 150);
    }

    #[test]
    fn test_lens_rendered() {
        let fixture = Fixture::new(1);
        let mut input = fixture.input();
        input.lens = Some(ReversalLens::Shadow);
        let (prompt, _) = PromptAssembler::new(PromptConfig::default()).assemble(&input);
        assert!(prompt.user.contains("shadow side"));
    }
}
