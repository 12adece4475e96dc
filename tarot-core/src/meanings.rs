//! Short card meanings for offline composition.
//!
//! Phrases are lowercase fragments meant to sit mid-sentence; none of them
//! names another card.

use crate::cards::{CardId, Rank, Suit};

/// Upright and reversed fragments for each major, by number.
const MAJORS: [(&str, &str); 22] = [
    ("a fresh start taken with open trust", "hesitation before a leap, or a risk not yet thought through"),
    ("skill and resources ready to be put to use", "scattered focus or talent held back"),
    ("quiet inner knowing that asks to be heard", "intuition drowned out by outside noise"),
    ("abundance, care and creative growth", "care given to others at the cost of oneself"),
    ("structure, responsibility and steady leadership", "rigid control or a struggle over authority"),
    ("tradition, teaching and shared values", "questioning inherited rules to find one's own"),
    ("a meaningful choice made from the heart", "values and desires pulling in different directions"),
    ("determined movement toward a goal", "effort spent without a clear direction"),
    ("courage expressed through patience and gentleness", "self-doubt or a quiet loss of nerve"),
    ("solitude and reflection that bring insight", "withdrawal that has become isolation"),
    ("a turning point and shifting circumstances", "resisting a change that is already underway"),
    ("fairness, accountability and clear decisions", "an imbalance that needs honest review"),
    ("a pause that changes perspective", "stalling, or a sacrifice that no longer serves"),
    ("an ending that clears space for something new", "holding on to what has already finished"),
    ("balance found through patience and blending", "excess or impatience upsetting the balance"),
    ("attachments and habits that hold on tightly", "loosening a grip and reclaiming freedom"),
    ("sudden upheaval that reveals the truth", "a disruption resisted or delayed"),
    ("hope, healing and renewed faith", "hope that feels distant and needs tending"),
    ("uncertainty, dreams and the unknown", "confusion beginning to lift"),
    ("warmth, clarity and vitality", "joy that is present but muted"),
    ("a calling, reckoning and renewal", "self-judgement that blocks a fresh start"),
    ("completion, integration and wholeness", "a cycle not quite closed"),
];

/// Upright and reversed fragments for each rank, Ace first.
const RANKS: [(&str, &str); 14] = [
    ("a new beginning", "a beginning that stalls"),
    ("a choice or partnership", "indecision or imbalance between two sides"),
    ("early growth and collaboration", "plans that lack support"),
    ("stability and consolidation", "stagnation or holding too tight"),
    ("conflict or loss", "recovery from conflict"),
    ("movement toward relief and exchange", "a slow or uneven recovery"),
    ("assessment and perseverance", "doubt about the effort involved"),
    ("change, speed or effort", "restlessness or feeling stuck"),
    ("near-fulfilment and resilience", "worry about what is nearly finished"),
    ("completion and its full weight", "a burden ready to be set down"),
    ("curiosity and a message arriving", "immature or scattered energy"),
    ("action and pursuit", "haste or misdirected drive"),
    ("mature care and inner mastery", "that care turned inward or withheld"),
    ("authority and outward command", "authority used rigidly or not at all"),
];

fn suit_domain(suit: Suit) -> &'static str {
    match suit {
        Suit::Wands => "in drive and creative work",
        Suit::Cups => "in feelings and relationships",
        Suit::Swords => "in thought and communication",
        Suit::Pentacles => "in work, money and the body",
    }
}

/// Meaning fragment for a card in the given orientation.
pub fn meaning(card: CardId, reversed: bool) -> String {
    match card {
        CardId::Major(n) => {
            let (up, rev) = MAJORS[usize::from(n) % MAJORS.len()];
            (if reversed { rev } else { up }).to_string()
        }
        CardId::Minor { suit, rank } => {
            let (up, rev) = RANKS[rank_index(rank)];
            format!("{} {}", if reversed { rev } else { up }, suit_domain(suit))
        }
    }
}

fn rank_index(rank: Rank) -> usize {
    usize::from(rank.value().saturating_sub(1)).min(RANKS.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_card_has_both_meanings() {
        for card in CardId::all() {
            let up = meaning(card, false);
            let rev = meaning(card, true);
            assert!(!up.is_empty() && !rev.is_empty(), "{card}");
            assert_ne!(up, rev, "{card}");
        }
    }

    #[test]
    fn test_fragments_are_lowercase() {
        for card in CardId::all() {
            for reversed in [false, true] {
                let text = meaning(card, reversed);
                assert!(!text.chars().any(|c| c.is_uppercase()), "{card}: {text}");
            }
        }
    }
}
