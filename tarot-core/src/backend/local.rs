//! Deterministic offline composer.
//!
//! Builds a reading from the structured hints alone. Output depends only on
//! the request, so the same spread and question always produce the same text.

use super::{BackendError, CompositionHints, ExpectedCard, GenerationRequest, NarrativeBackend};
use crate::meanings::meaning;
use crate::request::Tone;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const LOCAL_BACKEND_ID: &str = "local";

const GENTLE_OPENINGS: &[&str] = &[
    "Let's sit with these cards together and see what they offer.",
    "Take a breath; here is what the spread brings forward.",
];
const DIRECT_OPENINGS: &[&str] = &[
    "Here is what the cards show.",
    "The spread is clear about a few things.",
];
const REFLECTIVE_OPENINGS: &[&str] = &[
    "Consider this spread as a set of questions rather than answers.",
    "These cards invite a slower look at where you stand.",
];
const PLAYFUL_OPENINGS: &[&str] = &[
    "The cards have arrived with plenty to say.",
    "Quite a cast has shown up for this one.",
];

const CLOSINGS: &[&str] = &[
    "None of this is fixed; the cards describe currents you can choose how to work with.",
    "Take what resonates and leave the rest. The choices ahead remain yours.",
    "Treat this as a mirror rather than a forecast; how you respond is up to you.",
];

pub struct LocalComposer {
    id: String,
}

impl LocalComposer {
    pub fn new() -> Self {
        Self {
            id: LOCAL_BACKEND_ID.to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Compose the reading text.
    pub fn compose(&self, expected: &[ExpectedCard], hints: &CompositionHints) -> String {
        let mut rng = StdRng::seed_from_u64(seed(expected, &hints.question));
        let mut paragraphs = Vec::new();

        let openings = match hints.tone {
            Tone::Gentle => GENTLE_OPENINGS,
            Tone::Direct => DIRECT_OPENINGS,
            Tone::Reflective => REFLECTIVE_OPENINGS,
            Tone::Playful => PLAYFUL_OPENINGS,
        };
        let mut opening = openings.choose(&mut rng).copied().unwrap_or_default().to_string();
        let question = hints.question.trim();
        if !question.is_empty() {
            opening.push_str(&format!(" You asked: \"{question}\""));
        }
        paragraphs.push(opening);

        let cards: Vec<String> = expected.iter().map(card_sentence).collect();
        if !cards.is_empty() {
            paragraphs.push(cards.join(" "));
        }

        let mut synthesis: Vec<String> = hints
            .relationship_lines
            .iter()
            .chain(hints.pattern_lines.iter())
            .take(4)
            .map(|line| sentence(line))
            .collect();
        if let Some(lens) = hints.lens {
            synthesis.push(lens.instruction().replace("Read reversed", "Reversed").replace(
                "the querent",
                "you",
            ));
        }
        if !synthesis.is_empty() {
            paragraphs.push(synthesis.join(" "));
        }

        paragraphs.push(
            CLOSINGS
                .choose(&mut rng)
                .copied()
                .unwrap_or_default()
                .to_string(),
        );
        paragraphs.join("\n\n")
    }
}

impl Default for LocalComposer {
    fn default() -> Self {
        Self::new()
    }
}

fn seed(expected: &[ExpectedCard], question: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    for card in expected {
        card.position.hash(&mut hasher);
        card.card.hash(&mut hasher);
        card.reversed.hash(&mut hasher);
    }
    question.hash(&mut hasher);
    hasher.finish()
}

fn card_sentence(card: &ExpectedCard) -> String {
    let reversed = if card.reversed { ", reversed," } else { "" };
    format!(
        "In the {} position, {}{} speaks of {}.",
        card.position,
        card.name,
        reversed,
        meaning(card.card, card.reversed)
    )
}

fn sentence(line: &str) -> String {
    let line = line.trim();
    if line.ends_with(['.', '!', '?']) {
        line.to_string()
    } else {
        format!("{line}.")
    }
}

#[async_trait]
impl NarrativeBackend for LocalComposer {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        Ok(self.compose(&request.expected, &request.hints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{CardId, Rank, Suit};
    use crate::request::ReversalLens;

    fn three_cups() -> Vec<ExpectedCard> {
        [Rank::Three, Rank::Four, Rank::Five]
            .into_iter()
            .zip(["past", "present", "future"])
            .map(|(rank, position)| {
                let card = CardId::minor(Suit::Cups, rank);
                ExpectedCard {
                    position: position.to_string(),
                    card,
                    name: card.name(),
                    reversed: rank == Rank::Five,
                }
            })
            .collect()
    }

    #[test]
    fn test_names_every_card_and_position() {
        let hints = CompositionHints {
            question: "What should I focus on?".into(),
            ..Default::default()
        };
        let text = LocalComposer::new().compose(&three_cups(), &hints);
        for card in three_cups() {
            assert!(text.contains(&card.name), "missing {}", card.name);
            assert!(text.contains(&card.position), "missing {}", card.position);
        }
        assert!(text.contains("Five of Cups, reversed,"));
        assert!(text.contains("What should I focus on?"));
    }

    #[test]
    fn test_deterministic() {
        let hints = CompositionHints {
            question: "q".into(),
            tone: Tone::Playful,
            lens: Some(ReversalLens::Delayed),
            relationship_lines: vec!["Three of Cups and Four of Cups form a sequence".into()],
            pattern_lines: vec![],
        };
        let composer = LocalComposer::new();
        let a = composer.compose(&three_cups(), &hints);
        let b = composer.compose(&three_cups(), &hints);
        assert_eq!(a, b);
        assert!(a.contains("form a sequence."));
        assert!(a.contains("Reversed cards as energy that is delayed"));
    }

    #[tokio::test]
    async fn test_generate_is_local() {
        let composer = LocalComposer::new();
        assert!(!composer.is_remote());
        assert_eq!(composer.id(), LOCAL_BACKEND_ID);
        let request = crate::testing::generation_request(three_cups());
        let text = composer.generate(&request).await.unwrap();
        assert!(!text.is_empty());
    }
}
