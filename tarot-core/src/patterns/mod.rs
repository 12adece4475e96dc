//! Pattern detection.
//!
//! Matches the canonical identities in a [`SpreadAnalysis`] against the
//! static archetype tables. Matching never looks at display names, so a deck
//! style only changes how a match is described, not whether it fires.

pub mod tables;

pub use tables::{all_pattern_keys, JourneyStage, MajorSet, RunPhase, SuitTheme};

use crate::analysis::SpreadAnalysis;
use crate::cards::{CardId, Rank, Suit};
use crate::deck_style::DeckStyle;
use serde::Serialize;
use std::collections::BTreeSet;
use tables::{DYADS, JOURNEY_STAGES, SUIT_THEMES, TRIADS};

/// Family a pattern key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    JourneyStage,
    Triad,
    Dyad,
    SuitProgression,
}

/// A graph key plus the drawn cards that satisfied it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    pub key: String,
    pub kind: PatternKind,
    pub title: String,
    pub meaning: String,
    pub cards: Vec<CardId>,
}

impl PatternMatch {
    fn new(
        key: impl Into<String>,
        kind: PatternKind,
        title: impl Into<String>,
        meaning: impl Into<String>,
        cards: Vec<CardId>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            title: title.into(),
            meaning: meaning.into(),
            cards,
        }
    }

    /// Prose line naming cards under the given deck style.
    pub fn describe(&self, style: DeckStyle) -> String {
        let names: Vec<String> = self.cards.iter().map(|c| style.card_name(*c)).collect();
        format!("{} ({}): {}", self.title, names.join(", "), self.meaning)
    }
}

/// The spread's position on the Fool's Journey, for the themes object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneySummary {
    /// Stage holding the most majors; ties go to the later stage.
    pub dominant_stage: Option<String>,
    pub stages: Vec<(String, usize)>,
}

/// Matches analyzed spreads against the archetype tables.
#[derive(Debug, Clone, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    /// All matches for a spread in table order: journey, triads, dyads,
    /// suit progressions.
    pub fn detect(&self, analysis: &SpreadAnalysis) -> Vec<PatternMatch> {
        let majors: BTreeSet<u8> = analysis
            .card_ids()
            .filter_map(|c| match c {
                CardId::Major(n) => Some(n),
                CardId::Minor { .. } => None,
            })
            .collect();

        let mut matches = Vec::new();
        self.journey(&majors, &mut matches);
        self.major_sets(&majors, &TRIADS, PatternKind::Triad, &mut matches);
        self.major_sets(&majors, &DYADS, PatternKind::Dyad, &mut matches);
        self.suit_progressions(analysis, &mut matches);

        tracing::debug!(
            matches = matches.len(),
            keys = ?matches.iter().map(|m| m.key.as_str()).collect::<Vec<_>>(),
            "pattern detection complete"
        );
        matches
    }

    /// Summary of how the majors fall across the journey stages.
    pub fn journey_summary(&self, analysis: &SpreadAnalysis) -> JourneySummary {
        let stages: Vec<(String, usize)> = JOURNEY_STAGES
            .iter()
            .map(|stage| {
                let count = analysis
                    .card_ids()
                    .filter(|c| matches!(c, CardId::Major(n) if stage.contains(*n)))
                    .count();
                (stage.title.to_string(), count)
            })
            .collect();
        let dominant_stage = stages
            .iter()
            .filter(|(_, n)| *n > 0)
            .max_by_key(|(_, n)| *n)
            .map(|(title, _)| title.clone());
        JourneySummary {
            dominant_stage,
            stages,
        }
    }

    fn journey(&self, majors: &BTreeSet<u8>, out: &mut Vec<PatternMatch>) {
        for stage in JOURNEY_STAGES.iter() {
            let cards: Vec<CardId> = majors
                .iter()
                .filter(|n| stage.contains(**n))
                .map(|n| CardId::Major(*n))
                .collect();
            if !cards.is_empty() {
                out.push(PatternMatch::new(
                    stage.key,
                    PatternKind::JourneyStage,
                    stage.title,
                    stage.meaning,
                    cards,
                ));
            }
        }
    }

    fn major_sets(
        &self,
        majors: &BTreeSet<u8>,
        table: &[MajorSet],
        kind: PatternKind,
        out: &mut Vec<PatternMatch>,
    ) {
        for set in table {
            if set.cards.iter().all(|n| majors.contains(n)) {
                out.push(PatternMatch::new(
                    set.key,
                    kind,
                    set.title,
                    set.meaning,
                    set.cards.iter().map(|n| CardId::Major(*n)).collect(),
                ));
            }
        }
    }

    fn suit_progressions(&self, analysis: &SpreadAnalysis, out: &mut Vec<PatternMatch>) {
        for suit in Suit::ALL {
            let values: BTreeSet<u8> = analysis
                .card_ids()
                .filter(|c| c.suit() == Some(suit))
                .map(|c| c.value())
                .collect();
            if values.is_empty() {
                continue;
            }
            let sorted: Vec<u8> = values.iter().copied().collect();

            for run in consecutive_runs(&sorted) {
                if run.len() < 3 {
                    continue;
                }
                let Some(phase) = RunPhase::of_run(run) else {
                    continue;
                };
                out.push(PatternMatch::new(
                    format!("suit-progression:{}:{}", suit.key(), phase.key()),
                    PatternKind::SuitProgression,
                    format!("{} {}", suit.name(), capitalize(phase.key())),
                    phase.meaning(),
                    minors(suit, run),
                ));
            }

            for theme in SUIT_THEMES.iter() {
                if theme.ranks.iter().all(|r| values.contains(r)) {
                    out.push(PatternMatch::new(
                        format!("suit-progression:{}:{}", suit.key(), theme.key),
                        PatternKind::SuitProgression,
                        format!("{} {}", suit.name(), theme.title),
                        theme.meaning,
                        minors(suit, theme.ranks),
                    ));
                }
            }
        }
    }
}

fn minors(suit: Suit, values: &[u8]) -> Vec<CardId> {
    values
        .iter()
        .filter_map(|v| Rank::from_value(*v))
        .map(|r| CardId::minor(suit, r))
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split sorted, deduplicated values into maximal consecutive runs.
fn consecutive_runs(values: &[u8]) -> Vec<&[u8]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=values.len() {
        if i == values.len() || values[i] != values[i - 1] + 1 {
            runs.push(&values[start..i]);
            start = i;
        }
    }
    runs
}
