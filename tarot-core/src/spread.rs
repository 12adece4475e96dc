//! Spreads and their validation.
//!
//! A spread arrives from the drawing collaborator as an ordered list of
//! position labels, card names and orientations. It is validated once, up
//! front, before any backend work happens.

use crate::cards::{normalize, Card, CardId, Orientation};
use crate::deck_style::DeckStyle;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Largest custom spread accepted when no layout is named.
pub const MAX_CUSTOM_CARDS: usize = 15;

/// Malformed spread input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("spread has no cards")]
    Empty,

    #[error("unknown spread layout: {0}")]
    UnknownLayout(String),

    #[error("layout {layout} needs {expected} cards, got {found}")]
    WrongCardCount {
        layout: String,
        expected: usize,
        found: usize,
    },

    #[error("custom spreads hold at most {max} cards, got {found}")]
    TooManyCards { max: usize, found: usize },

    #[error("position '{0}' appears more than once")]
    DuplicatePosition(String),

    #[error("position label is empty")]
    EmptyPosition,

    #[error("position '{position}' is not part of layout {layout}")]
    UnknownPosition { layout: String, position: String },

    #[error("card '{0}' appears more than once")]
    DuplicateCard(String),

    #[error("unknown card identity: {0}")]
    UnknownCard(String),
}

// ============================================================================
// Layouts
// ============================================================================

/// Named spread layouts and their required positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpreadLayout {
    Single,
    ThreeCard,
    Relationship,
    Decision,
    CelticCross,
}

impl SpreadLayout {
    pub fn from_id(id: &str) -> Result<Self, ValidationError> {
        match normalize(id).replace(' ', "-").as_str() {
            "single" | "one-card" => Ok(SpreadLayout::Single),
            "three-card" | "three" | "past-present-future" => Ok(SpreadLayout::ThreeCard),
            "relationship" => Ok(SpreadLayout::Relationship),
            "decision" => Ok(SpreadLayout::Decision),
            "celtic-cross" | "celtic" => Ok(SpreadLayout::CelticCross),
            _ => Err(ValidationError::UnknownLayout(id.to_string())),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            SpreadLayout::Single => "single",
            SpreadLayout::ThreeCard => "three-card",
            SpreadLayout::Relationship => "relationship",
            SpreadLayout::Decision => "decision",
            SpreadLayout::CelticCross => "celtic-cross",
        }
    }

    /// Position labels in drawing order.
    pub fn positions(&self) -> &'static [&'static str] {
        match self {
            SpreadLayout::Single => &["Theme"],
            SpreadLayout::ThreeCard => &["Past", "Present", "Future"],
            SpreadLayout::Relationship => &["You", "Them", "The Connection"],
            SpreadLayout::Decision => &[
                "Heart of the Matter",
                "Path A",
                "Path B",
                "What Clarifies",
                "What to Remember",
            ],
            SpreadLayout::CelticCross => &[
                "Present",
                "Challenge",
                "Past",
                "Near Future",
                "Conscious",
                "Subconscious",
                "Self",
                "External Influences",
                "Hopes and Fears",
                "Outcome",
            ],
        }
    }

    pub fn card_count(&self) -> usize {
        self.positions().len()
    }
}

// ============================================================================
// Spread
// ============================================================================

/// One drawn card as received from the drawing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawnCardInput {
    pub position: String,
    pub card: String,
    #[serde(default)]
    pub reversed: bool,
}

impl DrawnCardInput {
    pub fn new(position: impl Into<String>, card: impl Into<String>, reversed: bool) -> Self {
        Self {
            position: position.into(),
            card: card.into(),
            reversed,
        }
    }
}

/// A card placed at a named position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub position: String,
    pub card: Card,
}

/// A validated spread: every position holds exactly one card.
#[derive(Debug, Clone, Serialize)]
pub struct Spread {
    layout: Option<SpreadLayout>,
    deck_style: DeckStyle,
    placements: Vec<Placement>,
}

impl Spread {
    /// Validate raw input into a spread.
    pub fn from_input(
        layout_id: Option<&str>,
        deck_style: DeckStyle,
        cards: &[DrawnCardInput],
    ) -> Result<Self, ValidationError> {
        let layout = layout_id.map(SpreadLayout::from_id).transpose()?;
        let placements = cards
            .iter()
            .map(|input| {
                let id = deck_style
                    .parse_card(&input.card)
                    .ok_or_else(|| ValidationError::UnknownCard(input.card.clone()))?;
                let orientation = if input.reversed {
                    Orientation::Reversed
                } else {
                    Orientation::Upright
                };
                Ok(Placement {
                    position: input.position.trim().to_string(),
                    card: Card { id, orientation },
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Self::new(layout, deck_style, placements)
    }

    /// Build a spread from already-resolved placements.
    pub fn new(
        layout: Option<SpreadLayout>,
        deck_style: DeckStyle,
        placements: Vec<Placement>,
    ) -> Result<Self, ValidationError> {
        if placements.is_empty() {
            return Err(ValidationError::Empty);
        }

        match layout {
            Some(layout) if placements.len() != layout.card_count() => {
                return Err(ValidationError::WrongCardCount {
                    layout: layout.id().to_string(),
                    expected: layout.card_count(),
                    found: placements.len(),
                });
            }
            None if placements.len() > MAX_CUSTOM_CARDS => {
                return Err(ValidationError::TooManyCards {
                    max: MAX_CUSTOM_CARDS,
                    found: placements.len(),
                });
            }
            _ => {}
        }

        let mut positions = HashSet::new();
        let mut cards = HashSet::new();
        for placement in &placements {
            let label = normalize(&placement.position);
            if label.is_empty() {
                return Err(ValidationError::EmptyPosition);
            }
            if let Some(layout) = layout {
                if !layout.positions().iter().any(|p| normalize(p) == label) {
                    return Err(ValidationError::UnknownPosition {
                        layout: layout.id().to_string(),
                        position: placement.position.clone(),
                    });
                }
            }
            if !positions.insert(label) {
                return Err(ValidationError::DuplicatePosition(placement.position.clone()));
            }
            if !cards.insert(placement.card.id) {
                return Err(ValidationError::DuplicateCard(placement.card.id.name()));
            }
        }

        Ok(Self {
            layout,
            deck_style,
            placements,
        })
    }

    pub fn layout(&self) -> Option<SpreadLayout> {
        self.layout
    }

    pub fn deck_style(&self) -> DeckStyle {
        self.deck_style
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.placements.iter().map(|p| &p.card)
    }

    pub fn card_ids(&self) -> impl Iterator<Item = CardId> + '_ {
        self.placements.iter().map(|p| p.card.id)
    }

    pub fn contains(&self, card: CardId) -> bool {
        self.placements.iter().any(|p| p.card.id == card)
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Reader-facing name of a card under this spread's deck style.
    pub fn display_name(&self, card: CardId) -> String {
        self.deck_style.display_name(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{Rank, Suit};

    fn three(cards: [(&str, &str, bool); 3]) -> Vec<DrawnCardInput> {
        cards
            .into_iter()
            .map(|(p, c, r)| DrawnCardInput::new(p, c, r))
            .collect()
    }

    #[test]
    fn test_valid_three_card() {
        let input = three([
            ("Past", "Three of Cups", false),
            ("Present", "Four of Cups", true),
            ("Future", "Five of Cups", false),
        ]);
        let spread = Spread::from_input(Some("three-card"), DeckStyle::RiderWaite, &input).unwrap();
        assert_eq!(spread.len(), 3);
        assert_eq!(spread.layout(), Some(SpreadLayout::ThreeCard));
        assert!(spread.placements()[1].card.is_reversed());
        assert!(spread.contains(CardId::minor(Suit::Cups, Rank::Five)));
    }

    #[test]
    fn test_wrong_card_count() {
        let input = vec![DrawnCardInput::new("Past", "The Fool", false)];
        let err = Spread::from_input(Some("three-card"), DeckStyle::RiderWaite, &input).unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongCardCount {
                layout: "three-card".into(),
                expected: 3,
                found: 1
            }
        );
    }

    #[test]
    fn test_duplicate_position_and_card() {
        let input = three([
            ("Past", "The Fool", false),
            ("past", "The Magician", false),
            ("Future", "The Sun", false),
        ]);
        assert!(matches!(
            Spread::from_input(Some("three-card"), DeckStyle::RiderWaite, &input),
            Err(ValidationError::DuplicatePosition(_))
        ));

        let input = three([
            ("Past", "The Fool", false),
            ("Present", "Fool", true),
            ("Future", "The Sun", false),
        ]);
        assert!(matches!(
            Spread::from_input(Some("three-card"), DeckStyle::RiderWaite, &input),
            Err(ValidationError::DuplicateCard(_))
        ));
    }

    #[test]
    fn test_unknown_card_and_layout() {
        let input = vec![DrawnCardInput::new("Theme", "The Comet", false)];
        assert_eq!(
            Spread::from_input(Some("single"), DeckStyle::RiderWaite, &input).unwrap_err(),
            ValidationError::UnknownCard("The Comet".into())
        );
        assert!(matches!(
            Spread::from_input(Some("horseshoe"), DeckStyle::RiderWaite, &input),
            Err(ValidationError::UnknownLayout(_))
        ));
    }

    #[test]
    fn test_unknown_position_for_layout() {
        let input = vec![DrawnCardInput::new("Outcome", "The Star", false)];
        assert!(matches!(
            Spread::from_input(Some("single"), DeckStyle::RiderWaite, &input),
            Err(ValidationError::UnknownPosition { .. })
        ));
    }

    #[test]
    fn test_custom_spread_and_style_names() {
        let input = vec![
            DrawnCardInput::new("Root", "Lust", false),
            DrawnCardInput::new("Branch", "Knight of Disks", true),
        ];
        let spread = Spread::from_input(None, DeckStyle::Thoth, &input).unwrap();
        assert_eq!(spread.placements()[0].card.id, CardId::Major(8));
        assert_eq!(
            spread.placements()[1].card.id,
            CardId::minor(Suit::Pentacles, Rank::King)
        );
        assert!(matches!(
            Spread::from_input(None, DeckStyle::RiderWaite, &[]),
            Err(ValidationError::Empty)
        ));
    }

    #[test]
    fn test_every_layout_accepts_its_positions() {
        for layout in [
            SpreadLayout::Single,
            SpreadLayout::ThreeCard,
            SpreadLayout::Relationship,
            SpreadLayout::Decision,
            SpreadLayout::CelticCross,
        ] {
            let input: Vec<_> = layout
                .positions()
                .iter()
                .zip(CardId::all())
                .map(|(p, c)| DrawnCardInput::new(*p, c.name(), false))
                .collect();
            let spread = Spread::from_input(Some(layout.id()), DeckStyle::RiderWaite, &input).unwrap();
            assert_eq!(spread.len(), layout.card_count());
        }
    }
}
