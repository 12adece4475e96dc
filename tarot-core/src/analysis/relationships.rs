//! Relationship detection over an ordered spread.
//!
//! A fixed battery of independent checks, run in a fixed order. Each check
//! appends zero or more typed entries, so the output order is stable for a
//! given spread.

use crate::cards::{CardId, Rank, Suit};
use crate::deck_style::DeckStyle;
use crate::spread::Spread;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First/last value gap above which the spread reads as an arc.
pub const ARC_THRESHOLD: u8 = 7;

/// Shortest same-suit run reported as a suit run.
pub const MIN_SUIT_RUN: usize = 3;

/// Minimum cards of one suit before dominance is considered.
pub const DOMINANCE_MIN_COUNT: usize = 3;

/// Lead over the runner-up suit that counts as dominance.
pub const DOMINANCE_MIN_LEAD: usize = 2;

/// Share of suited cards (in tenths) that counts as dominance.
const DOMINANCE_SHARE_TENTHS: usize = 6;

/// Reversal share (in tenths) for the heavy bucket.
const HEAVY_REVERSAL_TENTHS: usize = 6;

/// Reversal share (in tenths) for the moderate bucket.
const MODERATE_REVERSAL_TENTHS: usize = 3;

/// A named two-card combination from the curated pairing table.
#[derive(Debug, Clone)]
pub struct KnownPairing {
    pub cards: [CardId; 2],
    pub name: &'static str,
    pub meaning: &'static str,
}

impl KnownPairing {
    fn new(a: CardId, b: CardId, name: &'static str, meaning: &'static str) -> Self {
        Self {
            cards: [a, b],
            name,
            meaning,
        }
    }
}

lazy_static! {
    /// Curated pairings, checked by set membership in any positions.
    pub static ref KNOWN_PAIRINGS: Vec<KnownPairing> = vec![
        KnownPairing::new(CardId::Major(16), CardId::Major(17), "Storm and Shelter",
            "upheaval clears the ground for renewed hope"),
        KnownPairing::new(CardId::Major(6), CardId::Major(15), "Devotion and Attachment",
            "a bond that asks whether it is chosen freely or held by habit"),
        KnownPairing::new(CardId::Major(1), CardId::Major(2), "Voice and Silence",
            "outer skill meets inner knowing"),
        KnownPairing::new(CardId::Major(3), CardId::Major(4), "Nurture and Structure",
            "growth that needs both care and boundaries"),
        KnownPairing::new(CardId::Major(18), CardId::Major(19), "Night and Dawn",
            "uncertainty giving way to clarity"),
        KnownPairing::new(CardId::Major(0), CardId::Major(21), "Beginning and Completion",
            "one cycle closes as another opens"),
        KnownPairing::new(CardId::Major(13), CardId::Major(20), "Ending and Awakening",
            "a release that makes room for a calling"),
        KnownPairing::new(CardId::Major(9), CardId::Major(12), "Chosen Pause",
            "withdrawal that serves a change in perspective"),
        KnownPairing::new(CardId::Major(10), CardId::Major(11), "Fortune and Fairness",
            "circumstance and accountability weighing on each other"),
        KnownPairing::new(CardId::Major(7), CardId::Major(8), "Drive and Gentleness",
            "willpower steered by patience rather than force"),
        KnownPairing::new(CardId::minor(Suit::Swords, Rank::Ten), CardId::Major(17),
            "Rock Bottom and Hope", "the lowest point already holds the first light"),
        KnownPairing::new(CardId::minor(Suit::Swords, Rank::Three), CardId::minor(Suit::Cups, Rank::Six),
            "Heartache and Memory", "old tenderness surfacing around a present hurt"),
        KnownPairing::new(CardId::minor(Suit::Cups, Rank::Ace), CardId::minor(Suit::Cups, Rank::Two),
            "Opening Heart", "new feeling finding a partner to meet it"),
        KnownPairing::new(CardId::minor(Suit::Pentacles, Rank::Five), CardId::minor(Suit::Pentacles, Rank::Six),
            "Need and Support", "hardship that can be met by asking and receiving"),
    ];
}

// ============================================================================
// Relationship types
// ============================================================================

/// Direction of an arc from the first card to the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcDirection {
    Rising,
    Falling,
}

/// Size class of a court-card grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourtGrouping {
    Pair,
    Cluster,
}

/// Share of reversed cards, bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReversalClass {
    #[default]
    Low,
    Moderate,
    Heavy,
}

/// Reversal statistics for a spread.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReversalProfile {
    pub count: usize,
    pub ratio: f32,
    pub class: ReversalClass,
}

impl ReversalProfile {
    pub fn of(spread: &Spread) -> Self {
        let total = spread.len();
        let count = spread.cards().filter(|c| c.is_reversed()).count();
        let class = if total == 0 {
            ReversalClass::Low
        } else if count * 10 >= total * HEAVY_REVERSAL_TENTHS {
            ReversalClass::Heavy
        } else if count * 10 >= total * MODERATE_REVERSAL_TENTHS {
            ReversalClass::Moderate
        } else {
            ReversalClass::Low
        };
        Self {
            count,
            ratio: if total == 0 { 0.0 } else { count as f32 / total as f32 },
            class,
        }
    }
}

/// A detected relationship among drawn cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Relationship {
    /// Two adjacent cards whose numbers step by one.
    Sequence {
        positions: Vec<String>,
        cards: Vec<CardId>,
    },
    KnownPairing {
        name: String,
        meaning: String,
        cards: Vec<CardId>,
    },
    Arc {
        from: CardId,
        to: CardId,
        gap: u8,
        direction: ArcDirection,
    },
    SuitRun {
        suit: Suit,
        ranks: Vec<Rank>,
        cards: Vec<CardId>,
    },
    SuitDominance {
        suit: Suit,
        count: usize,
        share: f32,
    },
    CourtCluster {
        grouping: CourtGrouping,
        count: usize,
        single_suit: Option<Suit>,
        cards: Vec<CardId>,
    },
    ReversalHeavy {
        count: usize,
        ratio: f32,
    },
    AdjacentReversals {
        positions: Vec<String>,
        pairs: usize,
    },
}

impl Relationship {
    /// Stable kind label ("suit-run", "known-pairing").
    pub fn kind(&self) -> &'static str {
        match self {
            Relationship::Sequence { .. } => "sequence",
            Relationship::KnownPairing { .. } => "known-pairing",
            Relationship::Arc { .. } => "arc",
            Relationship::SuitRun { .. } => "suit-run",
            Relationship::SuitDominance { .. } => "suit-dominance",
            Relationship::CourtCluster { .. } => "court-cluster",
            Relationship::ReversalHeavy { .. } => "reversal-heavy",
            Relationship::AdjacentReversals { .. } => "adjacent-reversals",
        }
    }

    /// One line of prose for prompts and local composition.
    pub fn describe(&self, style: DeckStyle) -> String {
        let names = |cards: &[CardId]| {
            cards
                .iter()
                .map(|c| style.card_name(*c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Relationship::Sequence { positions, cards } => format!(
                "{} step into one another across {}",
                names(cards),
                positions.join(" and ")
            ),
            Relationship::KnownPairing { name, meaning, cards } => {
                format!("{} ({}): {meaning}", name, names(cards))
            }
            Relationship::Arc {
                from,
                to,
                gap,
                direction,
            } => format!(
                "the spread travels from {} to {}, a {} arc spanning {gap} steps",
                style.card_name(*from),
                style.card_name(*to),
                match direction {
                    ArcDirection::Rising => "rising",
                    ArcDirection::Falling => "falling",
                }
            ),
            Relationship::SuitRun { suit, cards, .. } => {
                format!("a run in {}: {}", style.suit_name(*suit), names(cards))
            }
            Relationship::SuitDominance { suit, count, share } => format!(
                "{} dominate with {count} cards ({:.0}% of the suited cards)",
                style.suit_name(*suit),
                share * 100.0
            ),
            Relationship::CourtCluster {
                grouping,
                count,
                single_suit,
                cards,
            } => {
                let base = match grouping {
                    CourtGrouping::Pair => format!("a pair of court cards ({})", names(cards)),
                    CourtGrouping::Cluster => {
                        format!("a cluster of {count} court cards ({})", names(cards))
                    }
                };
                match single_suit {
                    Some(suit) => format!("{base}, all in {}", style.suit_name(*suit)),
                    None => base,
                }
            }
            Relationship::ReversalHeavy { count, ratio } => format!(
                "{count} reversed cards ({:.0}% of the spread) suggest blocked or inward-turned energy",
                ratio * 100.0
            ),
            Relationship::AdjacentReversals { positions, pairs } => format!(
                "reversed cards sit side by side at {} ({pairs} adjacent pair(s))",
                positions.join(" and ")
            ),
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

/// Run the whole battery in its fixed order.
pub fn detect_relationships(spread: &Spread) -> Vec<Relationship> {
    let mut out = Vec::new();
    detect_sequences(spread, &mut out);
    detect_known_pairings(spread, &mut out);
    detect_arc(spread, &mut out);
    detect_suit_runs(spread, &mut out);
    detect_suit_dominance(spread, &mut out);
    detect_court_cluster(spread, &mut out);
    detect_reversal_ratio(spread, &mut out);
    detect_adjacent_reversals(spread, &mut out);
    out
}

fn same_family(a: CardId, b: CardId) -> bool {
    a.is_major() == b.is_major()
}

fn detect_sequences(spread: &Spread, out: &mut Vec<Relationship>) {
    for pair in spread.placements().windows(2) {
        let (a, b) = (pair[0].card.id, pair[1].card.id);
        if same_family(a, b) && a.value().abs_diff(b.value()) == 1 {
            out.push(Relationship::Sequence {
                positions: vec![pair[0].position.clone(), pair[1].position.clone()],
                cards: vec![a, b],
            });
        }
    }
}

fn detect_known_pairings(spread: &Spread, out: &mut Vec<Relationship>) {
    for pairing in KNOWN_PAIRINGS.iter() {
        if pairing.cards.iter().all(|c| spread.contains(*c)) {
            out.push(Relationship::KnownPairing {
                name: pairing.name.to_string(),
                meaning: pairing.meaning.to_string(),
                cards: pairing.cards.to_vec(),
            });
        }
    }
}

fn detect_arc(spread: &Spread, out: &mut Vec<Relationship>) {
    let placements = spread.placements();
    if placements.len() < 3 {
        return;
    }
    let (Some(first), Some(last)) = (placements.first(), placements.last()) else {
        return;
    };
    let (from, to) = (first.card.id, last.card.id);
    if !same_family(from, to) {
        return;
    }
    let gap = from.value().abs_diff(to.value());
    if gap > ARC_THRESHOLD {
        out.push(Relationship::Arc {
            from,
            to,
            gap,
            direction: if to.value() > from.value() {
                ArcDirection::Rising
            } else {
                ArcDirection::Falling
            },
        });
    }
}

/// Longest run of consecutive values in a sorted, deduplicated list.
/// Ties keep the lowest run.
fn longest_run(values: &[u8]) -> &[u8] {
    let mut best = (0, 0);
    let mut start = 0;
    for i in 1..=values.len() {
        let continues = i < values.len() && values[i] == values[i - 1] + 1;
        if !continues {
            if i - start > best.1 - best.0 {
                best = (start, i);
            }
            start = i;
        }
    }
    &values[best.0..best.1]
}

fn detect_suit_runs(spread: &Spread, out: &mut Vec<Relationship>) {
    for suit in Suit::ALL {
        let mut values: Vec<u8> = spread
            .card_ids()
            .filter(|c| c.suit() == Some(suit))
            .map(|c| c.value())
            .collect();
        values.sort_unstable();
        values.dedup();

        let run = longest_run(&values);
        if run.len() >= MIN_SUIT_RUN {
            let ranks: Vec<Rank> = run.iter().filter_map(|v| Rank::from_value(*v)).collect();
            out.push(Relationship::SuitRun {
                suit,
                cards: ranks.iter().map(|r| CardId::minor(suit, *r)).collect(),
                ranks,
            });
        }
    }
}

/// Count of cards per suit, in suit order.
pub fn suit_counts(spread: &Spread) -> BTreeMap<Suit, usize> {
    let mut counts = BTreeMap::new();
    for suit in spread.card_ids().filter_map(|c| c.suit()) {
        *counts.entry(suit).or_insert(0) += 1;
    }
    counts
}

fn detect_suit_dominance(spread: &Spread, out: &mut Vec<Relationship>) {
    let counts = suit_counts(spread);
    let suited: usize = counts.values().sum();
    let mut ranked: Vec<(Suit, usize)> = counts.into_iter().collect();
    // Highest count first; ties keep suit order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let Some(&(suit, top)) = ranked.first() else {
        return;
    };
    let runner_up = ranked.get(1).map(|r| r.1).unwrap_or(0);
    if top < DOMINANCE_MIN_COUNT {
        return;
    }
    let leads = top - runner_up >= DOMINANCE_MIN_LEAD;
    let majority = top * 10 >= suited * DOMINANCE_SHARE_TENTHS;
    if leads || majority {
        out.push(Relationship::SuitDominance {
            suit,
            count: top,
            share: top as f32 / suited as f32,
        });
    }
}

fn detect_court_cluster(spread: &Spread, out: &mut Vec<Relationship>) {
    let courts: Vec<CardId> = spread.card_ids().filter(|c| c.is_court()).collect();
    if courts.len() < 2 {
        return;
    }
    let first_suit = courts[0].suit();
    let single_suit = first_suit.filter(|s| courts.iter().all(|c| c.suit() == Some(*s)));
    out.push(Relationship::CourtCluster {
        grouping: if courts.len() >= 3 {
            CourtGrouping::Cluster
        } else {
            CourtGrouping::Pair
        },
        count: courts.len(),
        single_suit,
        cards: courts,
    });
}

fn detect_reversal_ratio(spread: &Spread, out: &mut Vec<Relationship>) {
    let profile = ReversalProfile::of(spread);
    // The moderate bucket stays on the analysis profile only.
    if profile.class == ReversalClass::Heavy {
        out.push(Relationship::ReversalHeavy {
            count: profile.count,
            ratio: profile.ratio,
        });
    }
}

fn detect_adjacent_reversals(spread: &Spread, out: &mut Vec<Relationship>) {
    let reversed_pairs: Vec<_> = spread
        .placements()
        .windows(2)
        .filter(|w| w[0].card.is_reversed() && w[1].card.is_reversed())
        .collect();
    if let Some(first) = reversed_pairs.first() {
        out.push(Relationship::AdjacentReversals {
            positions: vec![first[0].position.clone(), first[1].position.clone()],
            pairs: reversed_pairs.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck_style::DeckStyle;
    use crate::spread::DrawnCardInput;

    fn spread(cards: &[(&str, bool)]) -> Spread {
        let input: Vec<_> = cards
            .iter()
            .enumerate()
            .map(|(i, (name, rev))| DrawnCardInput::new(format!("P{i}"), *name, *rev))
            .collect();
        Spread::from_input(None, DeckStyle::RiderWaite, &input).unwrap()
    }

    fn kinds(rels: &[Relationship]) -> Vec<&'static str> {
        rels.iter().map(|r| r.kind()).collect()
    }

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_run(&[1, 3, 4, 5, 9]), &[3, 4, 5]);
        assert_eq!(longest_run(&[1, 2, 4, 5]), &[1, 2]);
        assert_eq!(longest_run(&[]), &[] as &[u8]);
        assert_eq!(longest_run(&[7]), &[7]);
    }

    #[test]
    fn test_suit_run_names_exact_run() {
        let s = spread(&[
            ("Three of Cups", false),
            ("Seven of Wands", false),
            ("Five of Cups", false),
            ("Four of Cups", false),
        ]);
        let rels = detect_relationships(&s);
        let runs: Vec<_> = rels
            .iter()
            .filter_map(|r| match r {
                Relationship::SuitRun { suit, ranks, .. } => Some((*suit, ranks.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(runs, vec![(Suit::Cups, vec![Rank::Three, Rank::Four, Rank::Five])]);
    }

    #[test]
    fn test_reversal_buckets() {
        let heavy = spread(&[
            ("The Fool", true),
            ("The Sun", true),
            ("Ace of Swords", true),
            ("Two of Cups", false),
            ("Nine of Wands", false),
        ]);
        assert_eq!(ReversalProfile::of(&heavy).class, ReversalClass::Heavy);
        assert!(detect_relationships(&heavy)
            .iter()
            .any(|r| r.kind() == "reversal-heavy"));

        // 2 of 5 reversed, not adjacent, no other trigger.
        let forty = spread(&[
            ("The Fool", true),
            ("Six of Cups", false),
            ("Ace of Swords", true),
            ("Nine of Pentacles", false),
            ("Two of Wands", false),
        ]);
        let profile = ReversalProfile::of(&forty);
        assert_eq!(profile.class, ReversalClass::Moderate);
        assert!(detect_relationships(&forty).is_empty());
    }

    #[test]
    fn test_adjacent_reversals_flagged_once() {
        let s = spread(&[
            ("The Fool", true),
            ("Six of Cups", true),
            ("Ace of Swords", true),
            ("Nine of Pentacles", false),
        ]);
        let rels = detect_relationships(&s);
        let adjacent: Vec<_> = rels.iter().filter(|r| r.kind() == "adjacent-reversals").collect();
        assert_eq!(adjacent.len(), 1);
        assert!(matches!(
            adjacent[0],
            Relationship::AdjacentReversals { pairs: 2, .. }
        ));
    }

    #[test]
    fn test_sequence_pairing_and_arc() {
        let s = spread(&[("The Fool", false), ("The Tower", false), ("The Star", false)]);
        let rels = detect_relationships(&s);
        assert_eq!(kinds(&rels), vec!["sequence", "known-pairing", "arc"]);
        match &rels[2] {
            Relationship::Arc { gap, direction, .. } => {
                assert_eq!(*gap, 17);
                assert_eq!(*direction, ArcDirection::Rising);
            }
            other => panic!("expected arc, got {other:?}"),
        }
    }

    #[test]
    fn test_no_arc_across_families() {
        let s = spread(&[("The Fool", false), ("Two of Cups", false), ("King of Swords", false)]);
        assert!(!detect_relationships(&s).iter().any(|r| r.kind() == "arc"));
    }

    #[test]
    fn test_suit_dominance_rules() {
        // 3 Wands vs 1 Cups: lead of 2.
        let lead = spread(&[
            ("Two of Wands", false),
            ("Six of Wands", false),
            ("Nine of Wands", false),
            ("Ace of Cups", false),
        ]);
        assert!(detect_relationships(&lead)
            .iter()
            .any(|r| matches!(r, Relationship::SuitDominance { suit: Suit::Wands, count: 3, .. })));

        // 3 Wands vs 2 Cups: lead 1, share 60%.
        let share = spread(&[
            ("Two of Wands", false),
            ("Six of Wands", false),
            ("Nine of Wands", false),
            ("Ace of Cups", false),
            ("Seven of Cups", false),
        ]);
        assert!(detect_relationships(&share)
            .iter()
            .any(|r| r.kind() == "suit-dominance"));

        // 3 Wands, 2 Cups, 2 Swords: lead 1, share 3/7.
        let none = spread(&[
            ("Two of Wands", false),
            ("Six of Wands", false),
            ("Nine of Wands", false),
            ("Ace of Cups", false),
            ("Seven of Cups", false),
            ("Ace of Swords", false),
            ("Four of Swords", false),
        ]);
        assert!(!detect_relationships(&none)
            .iter()
            .any(|r| r.kind() == "suit-dominance"));
    }

    #[test]
    fn test_court_grouping() {
        let pair = spread(&[("Queen of Cups", false), ("The Moon", false), ("King of Cups", false)]);
        let rels = detect_relationships(&pair);
        assert!(rels.iter().any(|r| matches!(
            r,
            Relationship::CourtCluster {
                grouping: CourtGrouping::Pair,
                single_suit: Some(Suit::Cups),
                ..
            }
        )));

        let cluster = spread(&[
            ("Page of Wands", false),
            ("Queen of Cups", false),
            ("Knight of Swords", false),
        ]);
        assert!(detect_relationships(&cluster).iter().any(|r| matches!(
            r,
            Relationship::CourtCluster {
                grouping: CourtGrouping::Cluster,
                single_suit: None,
                count: 3,
                ..
            }
        )));
    }
}
