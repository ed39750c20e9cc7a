use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One spoken line: a speaker name (the literal "Narrator" or a character
/// name) and the text to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default)]
    pub lines: Vec<Line>,
}

/// A structured, multi-speaker story: title, the characters that appear
/// (excluding the narrator), and an ordered sequence of chapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub title: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

/// Input to the Script Formatter: either a full structured story, or a bare
/// string treated as a single narrator utterance.
#[derive(Debug, Clone)]
pub enum StoryInput {
    Structured(Story),
    PlainText(String),
}

/// Bijection from logical speaker names to numbered slots 1..4. The narrator
/// is always Slot 1; unmapped speakers fall back to Slot 1.
pub type SpeakerMap = HashMap<String, u8>;

/// Slot -> voice identifier, aligned with the slots actually used by a script.
pub type VoiceMap = HashMap<u8, String>;

/// Per-request voice overrides: character name -> upstream voice id. Any
/// non-empty override forces regeneration.
pub type VoiceOverrides = HashMap<String, String>;
