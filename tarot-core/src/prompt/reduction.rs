//! Prompt size control.
//!
//! Slimming is an ordered list of [`ReductionStep`]s, each a pure function
//! from a draft and a token budget to a smaller draft plus a report. Steps
//! only run while the draft is over the soft budget, and only when slimming
//! is enabled. The [`HardCap`] runs after them on every request.

use super::{estimate_tokens, Prompt, PromptDraft};
use serde::Serialize;

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: &'static str,
    /// Items removed from the draft.
    pub removed: usize,
}

/// One droppable-section rule.
pub trait ReductionStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, draft: PromptDraft, budget_tokens: usize) -> (PromptDraft, StepReport);
}

/// Drops retrieved passages, least relevant first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropPassages;

impl ReductionStep for DropPassages {
    fn name(&self) -> &'static str {
        "drop_passages"
    }

    fn apply(&self, mut draft: PromptDraft, budget_tokens: usize) -> (PromptDraft, StepReport) {
        let mut removed = 0;
        // Passages are kept best-first, so the tail is the least relevant.
        while draft.estimated_tokens() > budget_tokens && draft.passages.pop().is_some() {
            removed += 1;
        }
        (
            draft,
            StepReport {
                step: self.name(),
                removed,
            },
        )
    }
}

/// Trims personalization detail down to the tone line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimPersonalization;

impl ReductionStep for TrimPersonalization {
    fn name(&self) -> &'static str {
        "trim_personalization"
    }

    fn apply(&self, mut draft: PromptDraft, budget_tokens: usize) -> (PromptDraft, StepReport) {
        let mut removed = 0;
        while draft.estimated_tokens() > budget_tokens && draft.personalization.len() > 1 {
            draft.personalization.pop();
            removed += 1;
        }
        (
            draft,
            StepReport {
                step: self.name(),
                removed,
            },
        )
    }
}

/// Trims relationship and pattern prose, last lines first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimRelationshipProse;

impl ReductionStep for TrimRelationshipProse {
    fn name(&self) -> &'static str {
        "trim_relationship_prose"
    }

    fn apply(&self, mut draft: PromptDraft, budget_tokens: usize) -> (PromptDraft, StepReport) {
        let mut removed = 0;
        while draft.estimated_tokens() > budget_tokens {
            if draft.dignities.pop().is_some()
                || draft.relationships.pop().is_some()
                || draft.patterns.pop().is_some()
            {
                removed += 1;
            } else {
                break;
            }
        }
        (
            draft,
            StepReport {
                step: self.name(),
                removed,
            },
        )
    }
}

/// Slimming steps in their standard order.
pub fn default_steps() -> Vec<Box<dyn ReductionStep>> {
    vec![
        Box::new(DropPassages),
        Box::new(TrimPersonalization),
        Box::new(TrimRelationshipProse),
    ]
}

// ============================================================================
// Hard cap
// ============================================================================

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Result of the hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub truncated: bool,
    pub before_tokens: usize,
    pub after_tokens: usize,
}

/// Absolute ceiling on the rendered prompt. The user block is cut first;
/// the system block only if the user block alone cannot absorb the excess.
#[derive(Debug, Clone, Copy)]
pub struct HardCap {
    pub cap_tokens: usize,
}

impl HardCap {
    pub fn new(cap_tokens: usize) -> Self {
        Self { cap_tokens }
    }

    pub fn apply(&self, mut prompt: Prompt) -> (Prompt, Truncation) {
        let before = prompt.estimated_tokens();
        if before <= self.cap_tokens {
            return (
                prompt,
                Truncation {
                    truncated: false,
                    before_tokens: before,
                    after_tokens: before,
                },
            );
        }

        let system_tokens = estimate_tokens(&prompt.system);
        let marker_tokens = estimate_tokens(TRUNCATION_MARKER);
        if system_tokens + marker_tokens < self.cap_tokens {
            let user_budget = self.cap_tokens - system_tokens - marker_tokens;
            prompt.user = cut_chars(&prompt.user, user_budget * 4) + TRUNCATION_MARKER;
        } else {
            prompt.system = cut_chars(&prompt.system, self.cap_tokens * 4);
            prompt.user = String::new();
        }

        let after = prompt.estimated_tokens();
        (
            prompt,
            Truncation {
                truncated: true,
                before_tokens: before,
                after_tokens: after,
            },
        )
    }
}

/// First `max_chars` characters, backed off to a word boundary when one is
/// close.
fn cut_chars(text: &str, max_chars: usize) -> String {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let cut = &text[..end];
    if end == text.len() {
        return cut.to_string();
    }
    match cut.rfind(char::is_whitespace) {
        Some(ws) if ws * 5 >= end * 4 => cut[..ws].to_string(),
        _ => cut.to_string(),
    }
}
