//! Inbound reading requests.

use crate::analysis::ReversalClass;
use crate::spread::DrawnCardInput;
use serde::{Deserialize, Serialize};

/// Voice the reading is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Gentle,
    Direct,
    Reflective,
    Playful,
}

impl Tone {
    pub fn instruction(&self) -> &'static str {
        match self {
            Tone::Gentle => "Write warmly and gently.",
            Tone::Direct => "Be clear and direct without being harsh.",
            Tone::Reflective => "Write in a contemplative voice that invites reflection.",
            Tone::Playful => "Keep a light, playful touch while staying respectful.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl ExperienceLevel {
    pub fn instruction(&self) -> &'static str {
        match self {
            ExperienceLevel::Beginner => {
                "The querent is new to tarot; explain symbolism briefly in plain words."
            }
            ExperienceLevel::Intermediate => {
                "The querent knows the basics; skip definitions and focus on synthesis."
            }
            ExperienceLevel::Advanced => {
                "The querent is experienced; elemental dignities and correspondences are welcome."
            }
        }
    }
}

/// Reader-facing preferences.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Personalization {
    /// Never persisted unredacted.
    pub display_name: Option<String>,
    pub tone: Tone,
    pub experience: ExperienceLevel,
    pub focus_areas: Vec<String>,
}

/// How reversed cards are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReversalLens {
    Blocked,
    Internalized,
    Delayed,
    Shadow,
    Mirror,
}

impl ReversalLens {
    /// Lens implied by the reversal share when none was requested.
    pub fn for_class(class: ReversalClass) -> Option<ReversalLens> {
        match class {
            ReversalClass::Heavy => Some(ReversalLens::Blocked),
            ReversalClass::Moderate => Some(ReversalLens::Internalized),
            ReversalClass::Low => None,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            ReversalLens::Blocked => {
                "Read reversed cards as energy that is blocked or resisted, not as the opposite meaning."
            }
            ReversalLens::Internalized => {
                "Read reversed cards as energy turned inward, something being processed privately."
            }
            ReversalLens::Delayed => {
                "Read reversed cards as energy that is delayed or not yet ready to emerge."
            }
            ReversalLens::Shadow => {
                "Read reversed cards as the shadow side of the card, what is avoided or denied."
            }
            ReversalLens::Mirror => {
                "Read reversed cards as a mirror, asking the querent to look at their own part."
            }
        }
    }
}

/// One reading request from the drawing collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub deck_style: Option<String>,
    pub spread: Vec<DrawnCardInput>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub reflections: Option<String>,
    #[serde(default)]
    pub personalization: Personalization,
    #[serde(default)]
    pub reversal_lens: Option<ReversalLens>,
    /// Opaque evidence from image verification, passed through untouched.
    #[serde(default)]
    pub vision_proof: Option<String>,
}

impl ReadingRequest {
    pub fn new(spread: Vec<DrawnCardInput>, question: impl Into<String>) -> Self {
        Self {
            spread,
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_deck_style(mut self, style: impl Into<String>) -> Self {
        self.deck_style = Some(style.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_reflections(mut self, reflections: impl Into<String>) -> Self {
        self.reflections = Some(reflections.into());
        self
    }

    pub fn with_personalization(mut self, personalization: Personalization) -> Self {
        self.personalization = personalization;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.personalization.display_name = Some(name.into());
        self
    }

    pub fn with_reversal_lens(mut self, lens: ReversalLens) -> Self {
        self.reversal_lens = Some(lens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json() {
        let request: ReadingRequest = serde_json::from_str(
            r#"{
                "layout": "three-card",
                "deckStyle": "thoth-a1",
                "spread": [
                    {"position": "Past", "card": "Lust"},
                    {"position": "Present", "card": "Art", "reversed": true},
                    {"position": "Future", "card": "The Aeon"}
                ],
                "question": "Where is my work heading?",
                "personalization": {"displayName": "Sam", "tone": "direct", "focusAreas": ["career"]},
                "reversalLens": "shadow",
                "visionProof": "opaque-token"
            }"#,
        )
        .unwrap();
        assert_eq!(request.spread.len(), 3);
        assert!(request.spread[1].reversed);
        assert!(!request.spread[0].reversed);
        assert_eq!(request.personalization.tone, Tone::Direct);
        assert_eq!(request.personalization.experience, ExperienceLevel::Beginner);
        assert_eq!(request.reversal_lens, Some(ReversalLens::Shadow));
        assert_eq!(request.vision_proof.as_deref(), Some("opaque-token"));
    }

    #[test]
    fn test_default_lens_by_class() {
        assert_eq!(ReversalLens::for_class(ReversalClass::Heavy), Some(ReversalLens::Blocked));
        assert_eq!(
            ReversalLens::for_class(ReversalClass::Moderate),
            Some(ReversalLens::Internalized)
        );
        assert_eq!(ReversalLens::for_class(ReversalClass::Low), None);
    }
}
