use crate::core::config::VoiceConfig;
use serde::{Deserialize, Serialize};

/// Speaking persona of a story line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Narrator,
    MaleCharacter,
    FemaleCharacter,
}

impl Role {
    /// Order in which roles are tried by [`classify`]. Female aliases contain
    /// the male ones as substrings, so they must be tried first.
    pub const CLASSIFICATION_ORDER: [Role; 3] =
        [Role::Narrator, Role::FemaleCharacter, Role::MaleCharacter];

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Role::Narrator => &["narrator"],
            Role::MaleCharacter => &["male_character", "male character"],
            Role::FemaleCharacter => &["female_character", "female character"],
        }
    }

    /// Static stereo position of the role, -1.0 (left) to 1.0 (right).
    pub fn pan_bias(&self) -> f64 {
        match self {
            Role::Narrator => 0.0,
            Role::MaleCharacter => -0.5,
            Role::FemaleCharacter => 0.5,
        }
    }

    pub fn voice_id<'a>(&self, voices: &'a VoiceConfig) -> &'a str {
        match self {
            Role::Narrator => &voices.narrator,
            Role::MaleCharacter => &voices.male_character,
            Role::FemaleCharacter => &voices.female_character,
        }
    }

    pub fn is_narrator(&self) -> bool {
        matches!(self, Role::Narrator)
    }
}

/// Maps a line to its role: the first role (in classification order) with an
/// alias contained in the lowercased line wins, narrator otherwise.
pub fn classify(line: &str) -> Role {
    let lower = line.to_lowercase();
    Role::CLASSIFICATION_ORDER
        .iter()
        .copied()
        .find(|role| role.aliases().iter().any(|alias| lower.contains(alias)))
        .unwrap_or(Role::Narrator)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoryLine {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineClassification {
    pub index: usize,
    pub text: String,
    pub role: Role,
}

/// A story as ordered, non-empty lines. Indices count surviving lines only.
#[derive(Debug, Clone, Default)]
pub struct Story {
    pub lines: Vec<StoryLine>,
}

impl Story {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(clean_line)
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(index, text)| StoryLine { index, text })
            .collect();
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn classify(&self) -> Vec<LineClassification> {
        self.lines
            .iter()
            .map(|line| LineClassification {
                index: line.index,
                text: line.text.clone(),
                role: classify(&line.text),
            })
            .collect()
    }

    pub fn full_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trims a line and drops markdown emphasis and heading markers.
pub fn clean_line(line: &str) -> String {
    let line = line.trim().trim_start_matches('#').trim();
    line.replace("**", "")
        .replace("__", "")
        .replace('*', "")
        .trim()
        .to_string()
}

/// Removes a leading `Role Name:` label so the speaker tag is not read aloud.
pub fn strip_role_label(text: &str) -> &str {
    let Some((label, rest)) = text.split_once(':') else {
        return text;
    };
    let label = label.trim().to_lowercase();
    let is_role_label = Role::CLASSIFICATION_ORDER
        .iter()
        .any(|role| role.aliases().contains(&label.as_str()));
    let rest = rest.trim();
    if is_role_label && !rest.is_empty() {
        rest
    } else {
        text
    }
}

/// Splits text into pieces no longer than `max_chars` at sentence boundaries.
/// A single sentence longer than the limit is kept whole.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        if !current.is_empty() && current.len() + sentence.len() + 1 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;
    for (i, c) in text.char_indices() {
        if c == ' ' && prev_terminal {
            let piece = text[start..i].trim();
            if !piece.is_empty() {
                out.push(piece);
            }
            start = i;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
