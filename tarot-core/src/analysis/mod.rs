//! Spread analysis.
//!
//! A pure function of a validated [`Spread`]: elemental tags per card,
//! pairwise dignities, and the relationship battery. Recomputed for every
//! request and never persisted on its own.

pub mod elements;
pub mod relationships;

pub use elements::{card_dignity, dignity, element_of, suit_element, Dignity, Element};
pub use relationships::{
    detect_relationships, suit_counts, ArcDirection, CourtGrouping, Relationship, ReversalClass,
    ReversalProfile, KNOWN_PAIRINGS,
};

use crate::cards::{CardId, Suit};
use crate::deck_style::DeckStyle;
use crate::spread::Spread;
use serde::Serialize;
use std::collections::BTreeMap;

/// One card with its derived tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedCard {
    pub position: String,
    pub card: CardId,
    /// Name under the spread's deck style.
    pub display_name: String,
    pub reversed: bool,
    pub element: Element,
    pub value: u8,
}

/// Dignity between two drawn cards, by index into the spread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairDignity {
    pub first: usize,
    pub second: usize,
    pub dignity: Dignity,
}

/// Element counts and the single dominant element, if any.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ElementBalance {
    pub counts: BTreeMap<Element, usize>,
    pub dominant: Option<Element>,
}

impl ElementBalance {
    fn of(cards: &[AnalyzedCard]) -> Self {
        let mut counts: BTreeMap<Element, usize> =
            Element::ALL.into_iter().map(|e| (e, 0)).collect();
        for card in cards {
            *counts.entry(card.element).or_insert(0) += 1;
        }
        let max = counts.values().copied().max().unwrap_or(0);
        let leaders: Vec<Element> = counts
            .iter()
            .filter(|&(_, &n)| n == max && n > 0)
            .map(|(e, _)| *e)
            .collect();
        Self {
            dominant: match leaders.as_slice() {
                [only] => Some(*only),
                _ => None,
            },
            counts,
        }
    }

    /// Elements with no card in the spread.
    pub fn missing(&self) -> Vec<Element> {
        self.counts
            .iter()
            .filter(|&(_, &n)| n == 0)
            .map(|(e, _)| *e)
            .collect()
    }
}

/// Everything derived from a spread before pattern matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadAnalysis {
    pub cards: Vec<AnalyzedCard>,
    pub dignities: Vec<PairDignity>,
    pub relationships: Vec<Relationship>,
    pub element_balance: ElementBalance,
    pub reversal_profile: ReversalProfile,
    pub suit_counts: BTreeMap<Suit, usize>,
    pub major_count: usize,
}

/// Analyze a spread.
pub fn analyze(spread: &Spread) -> SpreadAnalysis {
    let cards: Vec<AnalyzedCard> = spread
        .placements()
        .iter()
        .map(|p| AnalyzedCard {
            position: p.position.clone(),
            card: p.card.id,
            display_name: spread.display_name(p.card.id),
            reversed: p.card.is_reversed(),
            element: element_of(p.card.id),
            value: p.card.id.value(),
        })
        .collect();

    let mut dignities = Vec::new();
    for i in 0..cards.len() {
        for j in (i + 1)..cards.len() {
            dignities.push(PairDignity {
                first: i,
                second: j,
                dignity: dignity(cards[i].element, cards[j].element),
            });
        }
    }

    SpreadAnalysis {
        element_balance: ElementBalance::of(&cards),
        major_count: cards.iter().filter(|c| c.card.is_major()).count(),
        relationships: detect_relationships(spread),
        reversal_profile: ReversalProfile::of(spread),
        suit_counts: suit_counts(spread),
        dignities,
        cards,
    }
}

impl SpreadAnalysis {
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn card_ids(&self) -> impl Iterator<Item = CardId> + '_ {
        self.cards.iter().map(|c| c.card)
    }

    /// Share of majors among the drawn cards.
    pub fn major_ratio(&self) -> f32 {
        if self.cards.is_empty() {
            0.0
        } else {
            self.major_count as f32 / self.cards.len() as f32
        }
    }

    pub fn has_relationship(&self, kind: &str) -> bool {
        self.relationships.iter().any(|r| r.kind() == kind)
    }

    /// Dignity lines for adjacent cards, the ones worth narrating.
    pub fn adjacent_dignity_lines(&self) -> Vec<String> {
        self.dignities
            .iter()
            .filter(|d| d.second == d.first + 1 && d.dignity != Dignity::Neutral)
            .map(|d| {
                let (a, b) = (&self.cards[d.first], &self.cards[d.second]);
                format!(
                    "{} ({}) and {} ({}) {}",
                    a.display_name,
                    a.element,
                    b.display_name,
                    b.element,
                    d.dignity.describe()
                )
            })
            .collect()
    }

    /// Relationship prose, one line per entry.
    pub fn relationship_lines(&self, style: DeckStyle) -> Vec<String> {
        self.relationships.iter().map(|r| r.describe(style)).collect()
    }
}
