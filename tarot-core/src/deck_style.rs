//! Deck-style naming.
//!
//! A deck style only changes how cards are named. Each style carries an
//! override table (major titles, suit names, court names, minor titles); any
//! card without an override falls through to the canonical Rider–Waite name.

use crate::cards::{normalize, CardId, Rank, Suit};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Supported deck styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DeckStyle {
    #[default]
    RiderWaite,
    Thoth,
    Marseille,
}

/// Naming overrides for one style.
#[derive(Debug, Default)]
struct StyleOverrides {
    majors: HashMap<u8, &'static str>,
    suits: HashMap<Suit, &'static str>,
    courts: HashMap<Rank, &'static str>,
    minor_titles: HashMap<(Suit, Rank), &'static str>,
}

lazy_static! {
    static ref THOTH: StyleOverrides = {
        let majors = HashMap::from([
            (1, "The Magus"),
            (2, "The Priestess"),
            (8, "Lust"),
            (10, "Fortune"),
            (11, "Adjustment"),
            (14, "Art"),
            (20, "The Aeon"),
            (21, "The Universe"),
        ]);
        let suits = HashMap::from([(Suit::Pentacles, "Disks")]);
        // Thoth courts shift down one step: its Knight sits where RWS has a King.
        let courts = HashMap::from([
            (Rank::Page, "Princess"),
            (Rank::Knight, "Prince"),
            (Rank::King, "Knight"),
        ]);
        let titles: [(Suit, [&'static str; 10]); 4] = [
            (Suit::Wands, [
                "Root of Fire", "Dominion", "Virtue", "Completion", "Strife",
                "Victory", "Valour", "Swiftness", "Strength", "Oppression",
            ]),
            (Suit::Cups, [
                "Root of Water", "Love", "Abundance", "Luxury", "Disappointment",
                "Pleasure", "Debauch", "Indolence", "Happiness", "Satiety",
            ]),
            (Suit::Swords, [
                "Root of Air", "Peace", "Sorrow", "Truce", "Defeat",
                "Science", "Futility", "Interference", "Cruelty", "Ruin",
            ]),
            (Suit::Pentacles, [
                "Root of Earth", "Change", "Works", "Power", "Worry",
                "Success", "Failure", "Prudence", "Gain", "Wealth",
            ]),
        ];
        let mut minor_titles = HashMap::new();
        for (suit, names) in titles {
            for (i, title) in names.into_iter().enumerate() {
                if let Some(rank) = Rank::from_value(i as u8 + 1) {
                    minor_titles.insert((suit, rank), title);
                }
            }
        }
        StyleOverrides { majors, suits, courts, minor_titles }
    };

    static ref MARSEILLE: StyleOverrides = StyleOverrides {
        majors: HashMap::from([
            (0, "Le Mat"),
            (1, "The Bateleur"),
            (2, "The Popess"),
            (5, "The Pope"),
            (10, "The Wheel of Fortune"),
            (13, "The Nameless Arcanum"),
            (16, "The House of God"),
            (20, "The Judgement"),
        ]),
        suits: HashMap::from([(Suit::Wands, "Batons"), (Suit::Pentacles, "Coins")]),
        courts: HashMap::from([(Rank::Page, "Valet")]),
        minor_titles: HashMap::new(),
    };

    static ref NO_OVERRIDES: StyleOverrides = StyleOverrides::default();
}

impl DeckStyle {
    pub const ALL: [DeckStyle; 3] = [DeckStyle::RiderWaite, DeckStyle::Thoth, DeckStyle::Marseille];

    /// Resolve a deck-style identifier; unknown ids use default naming.
    pub fn from_id(id: &str) -> DeckStyle {
        match normalize(id).as_str() {
            "rws" | "rws-1909" | "rider-waite" | "rider-waite-smith" => DeckStyle::RiderWaite,
            "thoth" | "thoth-a1" => DeckStyle::Thoth,
            "marseille" | "tarot-de-marseille" => DeckStyle::Marseille,
            other => {
                tracing::debug!(deck_style = other, "unknown deck style, using default naming");
                DeckStyle::RiderWaite
            }
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            DeckStyle::RiderWaite => "rws-1909",
            DeckStyle::Thoth => "thoth-a1",
            DeckStyle::Marseille => "marseille",
        }
    }

    fn overrides(&self) -> &'static StyleOverrides {
        match self {
            DeckStyle::RiderWaite => &NO_OVERRIDES,
            DeckStyle::Thoth => &THOTH,
            DeckStyle::Marseille => &MARSEILLE,
        }
    }

    pub fn suit_name(&self, suit: Suit) -> &'static str {
        self.overrides()
            .suits
            .get(&suit)
            .copied()
            .unwrap_or_else(|| suit.name())
    }

    pub fn rank_name(&self, rank: Rank) -> &'static str {
        self.overrides()
            .courts
            .get(&rank)
            .copied()
            .unwrap_or_else(|| rank.name())
    }

    /// The card's name in this style, without any title.
    pub fn card_name(&self, card: CardId) -> String {
        match card {
            CardId::Major(n) => self
                .overrides()
                .majors
                .get(&n)
                .map(|s| s.to_string())
                .unwrap_or_else(|| card.name()),
            CardId::Minor { suit, rank } => {
                format!("{} of {}", self.rank_name(rank), self.suit_name(suit))
            }
        }
    }

    /// Name shown to the reader, with the style's minor title when it has one
    /// ("Three of Disks (Works)").
    pub fn display_name(&self, card: CardId) -> String {
        let name = self.card_name(card);
        match card {
            CardId::Minor { suit, rank } => match self.overrides().minor_titles.get(&(suit, rank)) {
                Some(title) => format!("{name} ({title})"),
                None => name,
            },
            CardId::Major(_) => name,
        }
    }

    /// Names a narrative may use for this card: the style name and, when
    /// different, the canonical name.
    pub fn aliases(&self, card: CardId) -> Vec<String> {
        let mut names = vec![self.card_name(card)];
        let canonical = card.name();
        if !names.contains(&canonical) {
            names.push(canonical);
        }
        names
    }

    /// Parse a card name as written for this style, falling back to canonical
    /// parsing. Style names win, so "Knight of Cups" is the King under Thoth.
    pub fn parse_card(&self, name: &str) -> Option<CardId> {
        let wanted = normalize(name);
        let wanted = wanted.strip_prefix("the ").unwrap_or(&wanted);
        let overrides = self.overrides();

        for (&n, &title) in &overrides.majors {
            if normalize(title).trim_start_matches("the ") == wanted {
                return CardId::major(n);
            }
        }

        if !overrides.courts.is_empty() || !overrides.suits.is_empty() {
            if let Some((rank_word, suit_word)) = wanted.split_once(" of ") {
                let suit = Suit::ALL
                    .into_iter()
                    .find(|s| normalize(self.suit_name(*s)) == suit_word.trim());
                let rank = overrides
                    .courts
                    .iter()
                    .find(|(_, alias)| normalize(alias) == rank_word.trim())
                    .map(|(rank, _)| *rank);
                match (suit, rank) {
                    (Some(suit), Some(rank)) => return Some(CardId::minor(suit, rank)),
                    (None, Some(rank)) => {
                        if let Some(CardId::Minor { suit, .. }) =
                            CardId::parse(&format!("ace of {suit_word}"))
                        {
                            return Some(CardId::minor(suit, rank));
                        }
                    }
                    _ => {}
                }
            }
        }

        CardId::parse(name)
    }
}

impl fmt::Display for DeckStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl From<DeckStyle> for String {
    fn from(style: DeckStyle) -> String {
        style.id().to_string()
    }
}

impl From<String> for DeckStyle {
    fn from(id: String) -> Self {
        DeckStyle::from_id(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_naming_falls_through() {
        let style = DeckStyle::RiderWaite;
        for card in CardId::all() {
            assert_eq!(style.display_name(card), card.name());
        }
    }

    #[test]
    fn test_thoth_overrides() {
        let thoth = DeckStyle::Thoth;
        assert_eq!(thoth.card_name(CardId::Major(8)), "Lust");
        assert_eq!(thoth.card_name(CardId::Major(11)), "Adjustment");
        assert_eq!(thoth.card_name(CardId::Major(13)), "Death");
        assert_eq!(
            thoth.display_name(CardId::minor(Suit::Pentacles, Rank::Three)),
            "Three of Disks (Works)"
        );
        assert_eq!(
            thoth.card_name(CardId::minor(Suit::Cups, Rank::King)),
            "Knight of Cups"
        );
        assert_eq!(
            thoth.display_name(CardId::minor(Suit::Cups, Rank::Queen)),
            "Queen of Cups"
        );
    }

    #[test]
    fn test_thoth_parsing_prefers_style_names() {
        let thoth = DeckStyle::Thoth;
        assert_eq!(
            thoth.parse_card("Knight of Cups"),
            Some(CardId::minor(Suit::Cups, Rank::King))
        );
        assert_eq!(
            thoth.parse_card("Princess of Disks"),
            Some(CardId::minor(Suit::Pentacles, Rank::Page))
        );
        assert_eq!(thoth.parse_card("Lust"), Some(CardId::Major(8)));
        assert_eq!(thoth.parse_card("The Tower"), Some(CardId::Major(16)));
        assert_eq!(
            DeckStyle::RiderWaite.parse_card("Knight of Cups"),
            Some(CardId::minor(Suit::Cups, Rank::Knight))
        );
    }

    #[test]
    fn test_every_style_name_parses_back() {
        for style in DeckStyle::ALL {
            for card in CardId::all() {
                assert_eq!(
                    style.parse_card(&style.card_name(card)),
                    Some(card),
                    "{style} {card}"
                );
            }
        }
    }

    #[test]
    fn test_unknown_style_uses_default() {
        assert_eq!(DeckStyle::from_id("lenormand"), DeckStyle::RiderWaite);
        assert_eq!(DeckStyle::from_id("thoth-a1"), DeckStyle::Thoth);
        assert_eq!(DeckStyle::Thoth.to_string(), "thoth-a1");
    }
}
