//! Elemental correspondences and dignities.

use crate::cards::{CardId, Suit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four classical elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Fire,
    Water,
    Air,
    Earth,
}

impl Element {
    pub const ALL: [Element; 4] = [Element::Fire, Element::Water, Element::Air, Element::Earth];

    /// Fire and Air are active; Water and Earth are receptive.
    pub fn is_active(&self) -> bool {
        matches!(self, Element::Fire | Element::Air)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Element::Fire => "Fire",
            Element::Water => "Water",
            Element::Air => "Air",
            Element::Earth => "Earth",
        }
    }

    pub fn quality(&self) -> &'static str {
        match self {
            Element::Fire => "drive and inspiration",
            Element::Water => "feeling and intuition",
            Element::Air => "thought and communication",
            Element::Earth => "body, resources and practical life",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Element of each major, by number (Golden Dawn attributions).
const MAJOR_ELEMENTS: [Element; 22] = [
    Element::Air,   // The Fool
    Element::Air,   // The Magician (Mercury)
    Element::Water, // The High Priestess (Moon)
    Element::Earth, // The Empress (Venus)
    Element::Fire,  // The Emperor (Aries)
    Element::Earth, // The Hierophant (Taurus)
    Element::Air,   // The Lovers (Gemini)
    Element::Water, // The Chariot (Cancer)
    Element::Fire,  // Strength (Leo)
    Element::Earth, // The Hermit (Virgo)
    Element::Fire,  // Wheel of Fortune (Jupiter)
    Element::Air,   // Justice (Libra)
    Element::Water, // The Hanged Man
    Element::Water, // Death (Scorpio)
    Element::Fire,  // Temperance (Sagittarius)
    Element::Earth, // The Devil (Capricorn)
    Element::Fire,  // The Tower (Mars)
    Element::Air,   // The Star (Aquarius)
    Element::Water, // The Moon (Pisces)
    Element::Fire,  // The Sun
    Element::Fire,  // Judgement
    Element::Earth, // The World (Saturn)
];

pub fn suit_element(suit: Suit) -> Element {
    match suit {
        Suit::Wands => Element::Fire,
        Suit::Cups => Element::Water,
        Suit::Swords => Element::Air,
        Suit::Pentacles => Element::Earth,
    }
}

/// Element of any card. Minors inherit their suit's element.
pub fn element_of(card: CardId) -> Element {
    match card {
        CardId::Major(n) => MAJOR_ELEMENTS[usize::from(n) % MAJOR_ELEMENTS.len()],
        CardId::Minor { suit, .. } => suit_element(suit),
    }
}

/// How two elements interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dignity {
    /// Same element: the energy is doubled.
    Amplified,
    /// Both active or both receptive.
    Supportive,
    /// Opposing elements.
    Tension,
    Neutral,
}

impl Dignity {
    pub fn describe(&self) -> &'static str {
        match self {
            Dignity::Amplified => "amplify each other",
            Dignity::Supportive => "support each other",
            Dignity::Tension => "pull against each other",
            Dignity::Neutral => "sit side by side without strong interaction",
        }
    }
}

/// Supportive pairs: active with active, receptive with receptive.
const SUPPORTIVE: [(Element, Element); 2] = [
    (Element::Fire, Element::Air),
    (Element::Water, Element::Earth),
];

/// Opposing pairs.
const OPPOSING: [(Element, Element); 2] = [
    (Element::Fire, Element::Water),
    (Element::Air, Element::Earth),
];

fn pair_in(table: &[(Element, Element)], a: Element, b: Element) -> bool {
    table
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}

/// Dignity between two elements. Symmetric in its arguments.
pub fn dignity(a: Element, b: Element) -> Dignity {
    if a == b {
        Dignity::Amplified
    } else if pair_in(&SUPPORTIVE, a, b) {
        Dignity::Supportive
    } else if pair_in(&OPPOSING, a, b) {
        Dignity::Tension
    } else {
        Dignity::Neutral
    }
}

pub fn card_dignity(a: CardId, b: CardId) -> Dignity {
    dignity(element_of(a), element_of(b))
}
