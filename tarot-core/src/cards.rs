//! Canonical card identities.
//!
//! Every card is identified by its Rider–Waite numbering: 22 majors (0–21,
//! Strength VIII, Justice XI) and four suits of fourteen ranks. Display names
//! for other deck styles live in [`crate::deck_style`]; everything that
//! matches or scores cards works on these canonical identities only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of trump-style (major arcana) cards.
pub const MAJOR_COUNT: u8 = 22;

/// Canonical names of the majors, indexed by number.
pub const MAJOR_NAMES: [&str; MAJOR_COUNT as usize] = [
    "The Fool",
    "The Magician",
    "The High Priestess",
    "The Empress",
    "The Emperor",
    "The Hierophant",
    "The Lovers",
    "The Chariot",
    "Strength",
    "The Hermit",
    "Wheel of Fortune",
    "Justice",
    "The Hanged Man",
    "Death",
    "Temperance",
    "The Devil",
    "The Tower",
    "The Star",
    "The Moon",
    "The Sun",
    "Judgement",
    "The World",
];

// ============================================================================
// Suits and ranks
// ============================================================================

/// The four minor-arcana suits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Wands,
    Cups,
    Swords,
    Pentacles,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Wands, Suit::Cups, Suit::Swords, Suit::Pentacles];

    pub fn name(&self) -> &'static str {
        match self {
            Suit::Wands => "Wands",
            Suit::Cups => "Cups",
            Suit::Swords => "Swords",
            Suit::Pentacles => "Pentacles",
        }
    }

    /// Lowercase identifier used in pattern keys.
    pub fn key(&self) -> &'static str {
        match self {
            Suit::Wands => "wands",
            Suit::Cups => "cups",
            Suit::Swords => "swords",
            Suit::Pentacles => "pentacles",
        }
    }

    fn parse(word: &str) -> Option<Suit> {
        match word {
            "wands" | "wand" | "rods" | "staves" | "batons" => Some(Suit::Wands),
            "cups" | "cup" | "chalices" => Some(Suit::Cups),
            "swords" | "sword" => Some(Suit::Swords),
            "pentacles" | "pentacle" | "coins" | "disks" | "discs" => Some(Suit::Pentacles),
            _ => None,
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Minor-arcana ranks. The discriminant is the card's numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Ace = 1,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Page,
    Knight,
    Queen,
    King,
}

impl Rank {
    pub const ALL: [Rank; 14] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Page,
        Rank::Knight,
        Rank::Queen,
        Rank::King,
    ];

    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Option<Rank> {
        Rank::ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    pub fn is_court(&self) -> bool {
        self.value() >= Rank::Page.value()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rank::Ace => "Ace",
            Rank::Two => "Two",
            Rank::Three => "Three",
            Rank::Four => "Four",
            Rank::Five => "Five",
            Rank::Six => "Six",
            Rank::Seven => "Seven",
            Rank::Eight => "Eight",
            Rank::Nine => "Nine",
            Rank::Ten => "Ten",
            Rank::Page => "Page",
            Rank::Knight => "Knight",
            Rank::Queen => "Queen",
            Rank::King => "King",
        }
    }

    fn parse(word: &str) -> Option<Rank> {
        let rank = match word {
            "ace" | "one" | "1" => Rank::Ace,
            "two" | "2" => Rank::Two,
            "three" | "3" => Rank::Three,
            "four" | "4" => Rank::Four,
            "five" | "5" => Rank::Five,
            "six" | "6" => Rank::Six,
            "seven" | "7" => Rank::Seven,
            "eight" | "8" => Rank::Eight,
            "nine" | "9" => Rank::Nine,
            "ten" | "10" => Rank::Ten,
            "page" => Rank::Page,
            "knight" => Rank::Knight,
            "queen" => Rank::Queen,
            "king" => Rank::King,
            _ => return None,
        };
        Some(rank)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Card identity
// ============================================================================

/// Canonical identity of one of the 78 cards.
///
/// Serializes as its canonical name ("The Fool", "Three of Cups").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CardId {
    Major(u8),
    Minor { suit: Suit, rank: Rank },
}

impl CardId {
    /// A major by number; `None` outside 0–21.
    pub fn major(number: u8) -> Option<CardId> {
        (number < MAJOR_COUNT).then_some(CardId::Major(number))
    }

    pub fn minor(suit: Suit, rank: Rank) -> CardId {
        CardId::Minor { suit, rank }
    }

    /// All 78 cards in canonical order: majors, then each suit Ace..King.
    pub fn all() -> impl Iterator<Item = CardId> {
        (0..MAJOR_COUNT).map(CardId::Major).chain(
            Suit::ALL
                .into_iter()
                .flat_map(|suit| Rank::ALL.into_iter().map(move |rank| CardId::minor(suit, rank))),
        )
    }

    /// Numeric value: the major's number, or the rank value (1–14).
    pub fn value(&self) -> u8 {
        match self {
            CardId::Major(n) => *n,
            CardId::Minor { rank, .. } => rank.value(),
        }
    }

    pub fn is_major(&self) -> bool {
        matches!(self, CardId::Major(_))
    }

    pub fn suit(&self) -> Option<Suit> {
        match self {
            CardId::Major(_) => None,
            CardId::Minor { suit, .. } => Some(*suit),
        }
    }

    pub fn rank(&self) -> Option<Rank> {
        match self {
            CardId::Major(_) => None,
            CardId::Minor { rank, .. } => Some(*rank),
        }
    }

    pub fn is_court(&self) -> bool {
        self.rank().is_some_and(|r| r.is_court())
    }

    /// Canonical (Rider–Waite) name.
    pub fn name(&self) -> String {
        match self {
            CardId::Major(n) => MAJOR_NAMES
                .get(usize::from(*n))
                .copied()
                .unwrap_or("Unknown Major")
                .to_string(),
            CardId::Minor { suit, rank } => format!("{} of {}", rank.name(), suit.name()),
        }
    }

    /// Parse a canonical name.
    ///
    /// Accepts "The Fool", "Fool", "fool", "Judgment", "3 of Cups",
    /// "three of cups" and suit synonyms such as "Coins" or "Disks". Court
    /// aliases that change meaning between decks (Prince, Princess) are
    /// resolved by [`crate::deck_style::DeckStyle::parse_card`] instead.
    pub fn parse(name: &str) -> Option<CardId> {
        let normalized = normalize(name);
        let bare = normalized.strip_prefix("the ").unwrap_or(&normalized);

        if let Some(n) = MAJOR_NAMES
            .iter()
            .position(|major| normalize(major).trim_start_matches("the ") == bare)
        {
            return CardId::major(n as u8);
        }
        match bare {
            "judgment" => return Some(CardId::Major(20)),
            "wheel" | "fortune" => return Some(CardId::Major(10)),
            _ => {}
        }

        let (rank, suit) = bare.split_once(" of ")?;
        Some(CardId::minor(Suit::parse(suit.trim())?, Rank::parse(rank.trim())?))
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<CardId> for String {
    fn from(card: CardId) -> String {
        card.name()
    }
}

impl TryFrom<String> for CardId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CardId::parse(&value).ok_or_else(|| format!("unknown card identity: {value}"))
    }
}

/// Lowercase, trim, and collapse internal whitespace.
pub(crate) fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Orientation and drawn cards
// ============================================================================

/// Whether a card was drawn upright or reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Upright,
    Reversed,
}

impl Orientation {
    pub fn is_reversed(&self) -> bool {
        matches!(self, Orientation::Reversed)
    }
}

/// A drawn card: identity plus orientation. Immutable once drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub orientation: Orientation,
}

impl Card {
    pub fn upright(id: CardId) -> Self {
        Self {
            id,
            orientation: Orientation::Upright,
        }
    }

    pub fn reversed(id: CardId) -> Self {
        Self {
            id,
            orientation: Orientation::Reversed,
        }
    }

    pub fn is_reversed(&self) -> bool {
        self.orientation.is_reversed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_has_78_unique_cards() {
        let cards: Vec<_> = CardId::all().collect();
        assert_eq!(cards.len(), 78);
        let unique: std::collections::HashSet<_> = cards.iter().collect();
        assert_eq!(unique.len(), 78);
    }

    #[test]
    fn test_every_name_round_trips() {
        for card in CardId::all() {
            assert_eq!(CardId::parse(&card.name()), Some(card), "{card}");
        }
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(CardId::parse("fool"), Some(CardId::Major(0)));
        assert_eq!(CardId::parse("  The   High Priestess "), Some(CardId::Major(2)));
        assert_eq!(CardId::parse("Judgment"), Some(CardId::Major(20)));
        assert_eq!(
            CardId::parse("3 of cups"),
            Some(CardId::minor(Suit::Cups, Rank::Three))
        );
        assert_eq!(
            CardId::parse("Ace of Coins"),
            Some(CardId::minor(Suit::Pentacles, Rank::Ace))
        );
        assert_eq!(CardId::parse("Eleven of Cups"), None);
        assert_eq!(CardId::parse("The Void"), None);
    }

    #[test]
    fn test_values_and_courts() {
        assert_eq!(CardId::Major(21).value(), 21);
        let queen = CardId::minor(Suit::Swords, Rank::Queen);
        assert_eq!(queen.value(), 13);
        assert!(queen.is_court());
        assert!(!CardId::minor(Suit::Swords, Rank::Ten).is_court());
        assert_eq!(Rank::from_value(14), Some(Rank::King));
        assert_eq!(Rank::from_value(0), None);
        assert_eq!(CardId::major(22), None);
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&CardId::minor(Suit::Wands, Rank::Page)).unwrap();
        assert_eq!(json, "\"Page of Wands\"");
        let card: CardId = serde_json::from_str("\"The Tower\"").unwrap();
        assert_eq!(card, CardId::Major(16));
        assert!(serde_json::from_str::<CardId>("\"Nope\"").is_err());
    }
}
