//! Static archetype tables: journey stages, triads, dyads and suit
//! progression templates.

use lazy_static::lazy_static;

/// One stage of the Fool's Journey over the majors.
#[derive(Debug, Clone)]
pub struct JourneyStage {
    pub key: &'static str,
    pub title: &'static str,
    pub first: u8,
    pub last: u8,
    pub meaning: &'static str,
}

impl JourneyStage {
    pub fn contains(&self, number: u8) -> bool {
        (self.first..=self.last).contains(&number)
    }
}

/// A named set of majors matched by exact set membership.
#[derive(Debug, Clone)]
pub struct MajorSet {
    pub key: &'static str,
    pub title: &'static str,
    pub cards: &'static [u8],
    pub meaning: &'static str,
}

/// Phase of a consecutive same-suit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Beginnings,
    Trials,
    Completion,
    Court,
}

impl RunPhase {
    /// Phase of a run from its ranks, which must be sorted.
    pub fn of_run(values: &[u8]) -> Option<RunPhase> {
        let (first, last) = (*values.first()?, *values.last()?);
        if first >= 11 {
            return Some(RunPhase::Court);
        }
        let center = (first + last) / 2;
        Some(match center {
            0..=4 => RunPhase::Beginnings,
            5..=7 => RunPhase::Trials,
            _ => RunPhase::Completion,
        })
    }

    pub fn key(&self) -> &'static str {
        match self {
            RunPhase::Beginnings => "beginnings",
            RunPhase::Trials => "trials",
            RunPhase::Completion => "completion",
            RunPhase::Court => "court",
        }
    }

    pub fn meaning(&self) -> &'static str {
        match self {
            RunPhase::Beginnings => "an undertaking taking its first steps and finding form",
            RunPhase::Trials => "the middle of the road, where effort meets resistance",
            RunPhase::Completion => "a cycle ripening toward its close",
            RunPhase::Court => "people and roles in this area of life moving together",
        }
    }
}

/// A thematic (non-consecutive) rank set within one suit.
#[derive(Debug, Clone)]
pub struct SuitTheme {
    pub key: &'static str,
    pub title: &'static str,
    pub ranks: &'static [u8],
    pub meaning: &'static str,
}

lazy_static! {
    pub static ref JOURNEY_STAGES: Vec<JourneyStage> = vec![
        JourneyStage {
            key: "journey:departure",
            title: "Departure",
            first: 0,
            last: 7,
            meaning: "meeting the world: learning what one has, who guides, and what one wants",
        },
        JourneyStage {
            key: "journey:initiation",
            title: "Initiation",
            first: 8,
            last: 14,
            meaning: "turning inward: courage, solitude, surrender and rebalancing",
        },
        JourneyStage {
            key: "journey:return",
            title: "Return",
            first: 15,
            last: 21,
            meaning: "facing shadow and upheaval, then renewal, clarity and integration",
        },
    ];

    pub static ref TRIADS: Vec<MajorSet> = vec![
        MajorSet {
            key: "triad:healing-arc",
            title: "The Healing Arc",
            cards: &[16, 17, 19],
            meaning: "collapse, then hope, then a return of warmth and vitality",
        },
        MajorSet {
            key: "triad:transformation",
            title: "Transformation",
            cards: &[13, 14, 20],
            meaning: "an ending, a slow blending of what remains, and a call to rise",
        },
        MajorSet {
            key: "triad:mastery",
            title: "Mastery",
            cards: &[1, 7, 21],
            meaning: "skill joined to will, carried through to completion",
        },
        MajorSet {
            key: "triad:inner-wisdom",
            title: "Inner Wisdom",
            cards: &[2, 9, 18],
            meaning: "knowing that comes from quiet, solitude and dreams",
        },
        MajorSet {
            key: "triad:sovereignty",
            title: "Sovereignty",
            cards: &[3, 4, 5],
            meaning: "care, order and tradition shaping what one builds",
        },
        MajorSet {
            key: "triad:choice-and-bond",
            title: "Choice and Bond",
            cards: &[6, 11, 15],
            meaning: "what one chooses, what is fair, and what holds on",
        },
    ];

    pub static ref DYADS: Vec<MajorSet> = vec![
        MajorSet {
            key: "dyad:tower-star",
            title: "After the Storm",
            cards: &[16, 17],
            meaning: "what breaks open also lets in light",
        },
        MajorSet {
            key: "dyad:magician-priestess",
            title: "Action and Receptivity",
            cards: &[1, 2],
            meaning: "doing and listening asking to be balanced",
        },
        MajorSet {
            key: "dyad:empress-emperor",
            title: "Nurture and Order",
            cards: &[3, 4],
            meaning: "growth held inside a structure that protects it",
        },
        MajorSet {
            key: "dyad:lovers-devil",
            title: "Freedom and Attachment",
            cards: &[6, 15],
            meaning: "whether a bond is chosen or compulsive",
        },
        MajorSet {
            key: "dyad:moon-sun",
            title: "Night into Day",
            cards: &[18, 19],
            meaning: "confusion resolving into clarity",
        },
        MajorSet {
            key: "dyad:fool-world",
            title: "Full Circle",
            cards: &[0, 21],
            meaning: "a completion that is also a new beginning",
        },
        MajorSet {
            key: "dyad:death-judgement",
            title: "Release and Renewal",
            cards: &[13, 20],
            meaning: "letting go that clears the way for a calling",
        },
        MajorSet {
            key: "dyad:hermit-hanged-man",
            title: "Sacred Pause",
            cards: &[9, 12],
            meaning: "stepping back on purpose to see differently",
        },
    ];

    pub static ref SUIT_THEMES: Vec<SuitTheme> = vec![
        SuitTheme {
            key: "full-cycle",
            title: "Full Cycle",
            ranks: &[1, 10],
            meaning: "the seed and the harvest of the same matter",
        },
        SuitTheme {
            key: "recovery",
            title: "Recovery",
            ranks: &[5, 6],
            meaning: "difficulty followed by relief and movement",
        },
        SuitTheme {
            key: "culmination",
            title: "Culmination",
            ranks: &[9, 10],
            meaning: "near-fulfilment arriving at its full weight",
        },
    ];
}

/// Pattern keys for every suit progression, consecutive phases and themes.
pub fn suit_progression_keys() -> Vec<String> {
    let mut keys = Vec::new();
    for suit in crate::cards::Suit::ALL {
        for phase in [
            RunPhase::Beginnings,
            RunPhase::Trials,
            RunPhase::Completion,
            RunPhase::Court,
        ] {
            keys.push(format!("suit-progression:{}:{}", suit.key(), phase.key()));
        }
        for theme in SUIT_THEMES.iter() {
            keys.push(format!("suit-progression:{}:{}", suit.key(), theme.key));
        }
    }
    keys
}

/// Every pattern key the tables can produce.
pub fn all_pattern_keys() -> Vec<String> {
    JOURNEY_STAGES
        .iter()
        .map(|s| s.key.to_string())
        .chain(TRIADS.iter().map(|t| t.key.to_string()))
        .chain(DYADS.iter().map(|d| d.key.to_string()))
        .chain(suit_progression_keys())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journey_stages_partition_majors() {
        for n in 0..22u8 {
            let count = JOURNEY_STAGES.iter().filter(|s| s.contains(n)).count();
            assert_eq!(count, 1, "major {n}");
        }
    }

    #[test]
    fn test_run_phases() {
        assert_eq!(RunPhase::of_run(&[3, 4, 5]), Some(RunPhase::Beginnings));
        assert_eq!(RunPhase::of_run(&[5, 6, 7]), Some(RunPhase::Trials));
        assert_eq!(RunPhase::of_run(&[8, 9, 10]), Some(RunPhase::Completion));
        assert_eq!(RunPhase::of_run(&[12, 13, 14]), Some(RunPhase::Court));
        assert_eq!(RunPhase::of_run(&[]), None);
    }

    #[test]
    fn test_keys_unique() {
        let keys = all_pattern_keys();
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());
        assert_eq!(suit_progression_keys().len(), 4 * 7);
    }
}
