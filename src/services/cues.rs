use crate::services::script::Role;
use serde::{Deserialize, Serialize};

/// Prosody adjustments sent to the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionParams {
    pub speed: f64,
    pub pitch: f64,
    pub volume: f64,
}

impl EmotionParams {
    pub const NEUTRAL: EmotionParams = EmotionParams::new(0.0, 1.0, 1.0);
    pub const LOUD: EmotionParams = EmotionParams::new(0.25, 1.25, 1.3);
    pub const SUBDUED: EmotionParams = EmotionParams::new(-0.15, 0.9, 0.8);
    pub const MILD_RISE: EmotionParams = EmotionParams::new(0.05, 1.15, 1.0);

    pub const fn new(speed: f64, pitch: f64, volume: f64) -> Self {
        Self { speed, pitch, volume }
    }
}

impl Default for EmotionParams {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmotionRule {
    pub family: &'static str,
    pub keywords: &'static [&'static str],
    pub preset: EmotionParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SfxCue {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    /// Richer phrase handed to the sound-effect search.
    pub search_term: &'static str,
    /// Part of the whole-story ambience subset.
    pub ambient: bool,
}

pub const EMOTION_RULES: &[EmotionRule] = &[
    EmotionRule {
        family: "shout",
        keywords: &["shout", "yell", "scream", "roar"],
        preset: EmotionParams::new(0.2, 1.2, 1.4),
    },
    EmotionRule {
        family: "whisper",
        keywords: &["whisper", "murmur", "softly", "hush"],
        preset: EmotionParams::new(-0.2, 0.95, 0.6),
    },
    EmotionRule {
        family: "sad",
        keywords: &["sad", "cry", "tears", "sob", "sorrow"],
        preset: EmotionParams::new(-0.2, 0.85, 0.85),
    },
    EmotionRule {
        family: "happy",
        keywords: &["happy", "laugh", "joy", "smile", "delight"],
        preset: EmotionParams::new(0.15, 1.2, 1.1),
    },
    EmotionRule {
        family: "angry",
        keywords: &["angry", "furious", "rage", "snarl"],
        preset: EmotionParams::new(0.2, 0.9, 1.3),
    },
    EmotionRule {
        family: "calm",
        keywords: &["calm", "gently", "peaceful", "quietly"],
        preset: EmotionParams::new(-0.1, 1.0, 0.9),
    },
];

pub const SFX_CUES: &[SfxCue] = &[
    SfxCue {
        name: "rain",
        keywords: &["rain", "drizzle", "downpour"],
        search_term: "rain heavy rainstorm",
        ambient: true,
    },
    SfxCue {
        name: "forest",
        keywords: &["forest", "woods", "grove"],
        search_term: "forest ambience birds",
        ambient: true,
    },
    SfxCue {
        name: "gate",
        keywords: &["gate", "creak"],
        search_term: "creaky gate open",
        ambient: false,
    },
    SfxCue {
        name: "battle",
        keywords: &["battle", "sword", "clash", "fight"],
        search_term: "sword battle clash",
        ambient: false,
    },
    SfxCue {
        name: "storm",
        keywords: &["storm", "thunder", "lightning"],
        search_term: "thunderstorm thunder",
        ambient: true,
    },
    SfxCue {
        name: "fire",
        keywords: &["fire", "flame", "campfire", "burning"],
        search_term: "fire crackling campfire",
        ambient: false,
    },
    SfxCue {
        name: "crowd",
        keywords: &["crowd", "market", "tavern"],
        search_term: "crowd chatter murmur",
        ambient: false,
    },
    SfxCue {
        name: "wind",
        keywords: &["wind", "breeze", "gust"],
        search_term: "wind howling",
        ambient: true,
    },
    SfxCue {
        name: "river",
        keywords: &["river", "stream", "waterfall"],
        search_term: "river stream flowing water",
        ambient: true,
    },
    SfxCue {
        name: "beast",
        keywords: &["beast", "growl", "monster", "wolf"],
        search_term: "monster beast growl",
        ambient: false,
    },
];

const DIRECTIONS: &[(&str, f64)] = &[("left", -1.0), ("right", 1.0), ("behind", 0.0)];

const DISTANCE_CUES: &[&str] = &["behind", "echo", "distant", "far away"];

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialCues {
    /// -1.0 (left) to 1.0 (right).
    pub pan_position: f64,
    /// Set when a directional keyword replaced the role bias.
    pub directional_override: bool,
    /// One-shot effects, deduplicated, in detection order.
    pub sfx: Vec<String>,
}

/// Keyword-driven cue detection over fixed, ordered tables.
#[derive(Debug, Clone)]
pub struct CueExtractor {
    emotion_rules: Vec<EmotionRule>,
    sfx_cues: Vec<SfxCue>,
}

impl Default for CueExtractor {
    fn default() -> Self {
        Self::new(EMOTION_RULES.to_vec(), SFX_CUES.to_vec())
    }
}

impl CueExtractor {
    pub fn new(emotion_rules: Vec<EmotionRule>, sfx_cues: Vec<SfxCue>) -> Self {
        Self {
            emotion_rules,
            sfx_cues,
        }
    }

    /// Punctuation beats keywords: `!` then `...`, then the keyword families in
    /// declared order, then `?`.
    pub fn extract_emotion(&self, text: &str) -> EmotionParams {
        let text = text.trim();
        if text.ends_with('!') {
            return EmotionParams::LOUD;
        }
        if text.ends_with("...") || text.ends_with('…') {
            return EmotionParams::SUBDUED;
        }
        let lower = text.to_lowercase();
        if let Some(rule) = self
            .emotion_rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lower.contains(k)))
        {
            return rule.preset;
        }
        if text.ends_with('?') {
            return EmotionParams::MILD_RISE;
        }
        EmotionParams::NEUTRAL
    }

    pub fn extract_spatial(&self, text: &str, role: Role) -> SpatialCues {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let direction = DIRECTIONS
            .iter()
            .find(|(word, _)| words.contains(word))
            .map(|(_, pos)| *pos);

        SpatialCues {
            pan_position: direction.unwrap_or_else(|| role.pan_bias()),
            directional_override: direction.is_some(),
            sfx: self.matching_cues(&lower, |_| true),
        }
    }

    /// Ambience cues over the whole story text.
    pub fn extract_ambient(&self, story_text: &str) -> Vec<String> {
        self.matching_cues(&story_text.to_lowercase(), |cue| cue.ambient)
    }

    /// Distance or echo wording that calls for the stronger reverb.
    pub fn has_distance_cue(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        DISTANCE_CUES.iter().any(|cue| lower.contains(cue))
    }

    pub fn search_term(&self, cue: &str) -> String {
        self.sfx_cues
            .iter()
            .find(|c| c.name == cue)
            .map(|c| c.search_term.to_string())
            .unwrap_or_else(|| cue.to_string())
    }

    fn matching_cues(&self, lower: &str, include: impl Fn(&SfxCue) -> bool) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for cue in self.sfx_cues.iter().filter(|c| include(*c)) {
            if cue.keywords.iter().any(|k| lower.contains(k)) && !found.iter().any(|f| f == cue.name) {
                found.push(cue.name.to_string());
            }
        }
        found
    }
}
