//! Structural checks on a narrative: which cards it names, whether it walks
//! every position, and whether it names cards that were never drawn.

use crate::backend::ExpectedCard;
use crate::cards::{CardId, MAJOR_NAMES};
use crate::deck_style::DeckStyle;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;

/// Coverage below this caps coherence at 4.
pub const FULL_COVERAGE: f32 = 0.9;
/// Coverage below this caps coherence at 3.
pub const PARTIAL_COVERAGE: f32 = 0.7;

const RANK_WORDS: &[&str] = &[
    "ace", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "1",
    "2", "3", "4", "5", "6", "7", "8", "9", "10", "page", "knight", "queen", "king", "princess",
    "prince", "valet",
];

const SUIT_WORDS: &[&str] = &[
    "wands", "wand", "rods", "staves", "batons", "cups", "cup", "chalices", "swords", "sword",
    "pentacles", "pentacle", "coins", "disks", "discs",
];

lazy_static! {
    /// "Three of Cups", "3 of cups", "Princess of Disks".
    static ref MINOR_MENTION: Regex = Regex::new(&format!(
        r"(?i)\b({})\s+of\s+({})\b",
        RANK_WORDS.join("|"),
        SUIT_WORDS.join("|")
    ))
    .expect("valid minor mention regex");

    /// Capitalized major titles from every deck style, longest first.
    static ref MAJOR_MENTION: Regex = {
        let mut titles: BTreeSet<String> = MAJOR_NAMES.iter().map(|n| core_title(n)).collect();
        titles.insert("Judgment".to_string());
        for style in DeckStyle::ALL {
            for n in 0..MAJOR_NAMES.len() as u8 {
                if let Some(card) = CardId::major(n) {
                    titles.insert(core_title(&style.card_name(card)));
                }
            }
        }
        let mut titles: Vec<String> = titles.into_iter().collect();
        titles.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = titles
            .iter()
            .map(|t| {
                t.split_whitespace()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(
            r"\b(?:(?P<article>[Tt]he)\s+)?(?P<title>{alternation})\b(?P<card>\s+cards?\b)?"
        ))
        .expect("valid major mention regex")
    };
}

/// Title without a leading "The".
fn core_title(name: &str) -> String {
    name.strip_prefix("The ").unwrap_or(name).to_string()
}

/// A card named in a narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mention {
    pub card: CardId,
    /// Named unambiguously at least once: as a minor, a multi-word major
    /// title, or a major title with "the" before it or "card" after it.
    /// A bare "Strength" or "Justice" may just be a capitalized word.
    pub explicit: bool,
}

/// Card mentions in `text`, resolved under `style`, in order of first mention.
///
/// Major titles must be capitalized; minors match in any case.
pub fn mentions(text: &str, style: DeckStyle) -> Vec<Mention> {
    let mut found: Vec<(usize, Mention)> = Vec::new();
    for caps in MAJOR_MENTION.captures_iter(text) {
        let (Some(whole), Some(title)) = (caps.get(0), caps.name("title")) else {
            continue;
        };
        let Some(card) = style.parse_card(title.as_str()) else {
            continue;
        };
        let explicit = caps.name("article").is_some()
            || caps.name("card").is_some()
            || title.as_str().contains(char::is_whitespace);
        found.push((whole.start(), Mention { card, explicit }));
    }
    for caps in MINOR_MENTION.captures_iter(text) {
        let (Some(whole), Some(rank), Some(suit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if let Some(card) = style.parse_card(&format!("{} of {}", rank.as_str(), suit.as_str())) {
            found.push((
                whole.start(),
                Mention {
                    card,
                    explicit: true,
                },
            ));
        }
    }
    found.sort_by_key(|(at, _)| *at);

    let mut out: Vec<Mention> = Vec::new();
    for (_, mention) in found {
        match out.iter_mut().find(|m| m.card == mention.card) {
            Some(seen) => seen.explicit |= mention.explicit,
            None => out.push(mention),
        }
    }
    out
}

/// Cards named in `text`, explicitly or not, in order of first mention.
pub fn mentioned_cards(text: &str, style: DeckStyle) -> Vec<CardId> {
    mentions(text, style).into_iter().map(|m| m.card).collect()
}

/// Whether `label` appears in `text` as a whole word or phrase.
fn mentions_position(text: &str, label: &str) -> bool {
    let words: Vec<String> = label.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return true;
    }
    match Regex::new(&format!(r"(?i)\b{}\b", words.join(r"[\s-]+"))) {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&label.to_lowercase()),
    }
}

/// Result of the structural pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralReport {
    /// Share of drawn cards the narrative names.
    pub coverage: f32,
    pub missing_cards: Vec<String>,
    pub hallucinated_cards: Vec<String>,
    pub missing_positions: Vec<String>,
}

impl StructuralReport {
    /// Check `text` against the cards that were drawn.
    ///
    /// Any mention covers a drawn card. Only an explicit mention of an
    /// undrawn card counts as a hallucination.
    pub fn check(text: &str, expected: &[ExpectedCard], style: DeckStyle) -> Self {
        let mentioned = mentions(text, style);

        let missing_cards: Vec<String> = expected
            .iter()
            .filter(|e| !mentioned.iter().any(|m| m.card == e.card))
            .map(|e| e.name.clone())
            .collect();
        let hallucinated_cards: Vec<String> = mentioned
            .iter()
            .filter(|m| m.explicit && !expected.iter().any(|e| e.card == m.card))
            .map(|m| style.card_name(m.card))
            .collect();
        let missing_positions: Vec<String> = expected
            .iter()
            .filter(|e| !mentions_position(text, &e.position))
            .map(|e| e.position.clone())
            .collect();

        let coverage = if expected.is_empty() {
            1.0
        } else {
            (expected.len() - missing_cards.len()) as f32 / expected.len() as f32
        };

        Self {
            coverage,
            missing_cards,
            hallucinated_cards,
            missing_positions,
        }
    }

    /// Every position is addressed.
    pub fn spine_complete(&self) -> bool {
        self.missing_positions.is_empty()
    }

    pub fn has_hallucination(&self) -> bool {
        !self.hallucinated_cards.is_empty()
    }

    /// Highest coherence score the structure allows.
    pub fn coherence_cap(&self) -> u8 {
        let mut cap = 5;
        if !self.spine_complete() || self.coverage < FULL_COVERAGE {
            cap = 4;
        }
        if self.coverage < PARTIAL_COVERAGE {
            cap = 3;
        }
        if self.has_hallucination() {
            cap = 2;
        }
        cap
    }
}
