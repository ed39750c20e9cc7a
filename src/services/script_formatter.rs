use crate::config::Config;
use crate::models::{SpeakerMap, Story, StoryInput, VoiceOverrides};
use std::collections::{HashMap, HashSet};

const NARRATOR: &str = "Narrator";
const MAX_CHARACTER_SLOTS: usize = 3;

#[derive(Debug, Clone)]
pub struct FormattedScript {
    /// Newline-joined `Slot K: <text>` lines, ready to send upstream.
    pub script: String,
    /// Slots actually referenced by the script, Slot 1 first.
    pub slots_used: Vec<u8>,
    pub speaker_map: SpeakerMap,
    /// Voice ids aligned positionally with `slots_used`.
    pub voices: Vec<String>,
    /// Set when more than three non-narrator characters were folded into Slot 1.
    pub warning: Option<String>,
}

/// Converts a structured story (or plain text) into the upstream script
/// format, a speaker->slot map, and the aligned voice list.
pub fn format_script(
    input: &StoryInput,
    config: &Config,
    overrides: Option<&VoiceOverrides>,
) -> FormattedScript {
    match input {
        StoryInput::PlainText(text) => format_plain_text(text, config),
        StoryInput::Structured(story) => format_structured(story, config, overrides),
    }
}

fn format_plain_text(text: &str, config: &Config) -> FormattedScript {
    let mut speaker_map = SpeakerMap::new();
    speaker_map.insert(NARRATOR.to_string(), 1);

    FormattedScript {
        script: format!("Slot 1: {text}"),
        slots_used: vec![1],
        speaker_map,
        voices: vec![config.default_voice_for_slot(1).to_string()],
        warning: None,
    }
}

fn format_structured(
    story: &Story,
    config: &Config,
    overrides: Option<&VoiceOverrides>,
) -> FormattedScript {
    let mut speaker_map = SpeakerMap::new();
    speaker_map.insert(NARRATOR.to_string(), 1);

    let mut warning = None;
    for (idx, character) in story.characters.iter().enumerate() {
        if idx < MAX_CHARACTER_SLOTS {
            speaker_map.insert(character.clone(), (idx + 2) as u8);
        } else {
            warning.get_or_insert_with(|| {
                format!(
                    "story has {} non-narrator characters; extras beyond {} were folded into Slot 1",
                    story.characters.len(),
                    MAX_CHARACTER_SLOTS
                )
            });
        }
    }

    let mut lines = Vec::new();
    let mut slots_seen: HashSet<u8> = HashSet::new();
    slots_seen.insert(1);
    for chapter in &story.chapters {
        for line in &chapter.lines {
            let slot = *speaker_map.get(&line.speaker).unwrap_or(&1);
            slots_seen.insert(slot);
            lines.push(format!("Slot {slot}: {}", line.text));
        }
    }

    let mut slots_used: Vec<u8> = slots_seen.into_iter().collect();
    slots_used.sort_unstable();

    // name -> override voice, for characters that have one.
    let override_by_name: HashMap<&str, &str> = overrides
        .map(|o| o.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect())
        .unwrap_or_default();

    let voices = slots_used
        .iter()
        .map(|slot| {
            let character_in_slot = speaker_map
                .iter()
                .find(|(_, s)| *s == slot)
                .map(|(name, _)| name.as_str());
            character_in_slot
                .and_then(|name| override_by_name.get(name))
                .map(|v| v.to_string())
                .unwrap_or_else(|| config.default_voice_for_slot(*slot).to_string())
        })
        .collect();

    FormattedScript {
        script: lines.join("\n"),
        slots_used,
        speaker_map,
        voices,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, Line};

    fn test_config() -> Config {
        Config {
            tts_base_url: "http://localhost".into(),
            tts_api_key: None,
            default_voice_slot1: "voice-1".into(),
            default_voice_slot2: "voice-2".into(),
            default_voice_slot3: "voice-3".into(),
            default_voice_slot4: "voice-4".into(),
            storage_root: "./storage".into(),
            s3_bucket: "bucket".into(),
            s3_base_prefix: "AIWorkflow".into(),
            aws_region: "us-east-1".into(),
            jwt_secret: "x".repeat(32),
            server_host: "0.0.0.0".into(),
            server_port: 8000,
            cors_origins: vec![],
        }
    }

    #[test]
    fn plain_text_becomes_single_narrator_slot() {
        let result = format_plain_text("hello there", &test_config());
        assert_eq!(result.script, "Slot 1: hello there");
        assert_eq!(result.slots_used, vec![1]);
        assert_eq!(result.voices, vec!["voice-1".to_string()]);
    }

    #[test]
    fn narrator_is_always_slot_one_and_characters_fill_two_through_four() {
        let story = Story {
            title: "Test".into(),
            characters: vec!["Kaveh".into(), "Mirza".into()],
            chapters: vec![Chapter {
                lines: vec![
                    Line {
                        speaker: "Narrator".into(),
                        text: "Once upon a time.".into(),
                    },
                    Line {
                        speaker: "Kaveh".into(),
                        text: "Hello.".into(),
                    },
                    Line {
                        speaker: "Mirza".into(),
                        text: "Hi.".into(),
                    },
                ],
            }],
        };

        let result = format_structured(&story, &test_config(), None);
        assert_eq!(result.speaker_map["Narrator"], 1);
        assert_eq!(result.speaker_map["Kaveh"], 2);
        assert_eq!(result.speaker_map["Mirza"], 3);
        assert_eq!(result.slots_used, vec![1, 2, 3]);
        assert!(result.warning.is_none());
        assert_eq!(
            result.script,
            "Slot 1: Once upon a time.\nSlot 2: Hello.\nSlot 3: Hi."
        );
    }

    #[test]
    fn extra_characters_beyond_three_fold_into_slot_one_with_a_warning() {
        let story = Story {
            title: "Test".into(),
            characters: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            chapters: vec![Chapter {
                lines: vec![Line {
                    speaker: "D".into(),
                    text: "I have no slot.".into(),
                }],
            }],
        };

        let result = format_structured(&story, &test_config(), None);
        assert!(!result.speaker_map.contains_key("D"));
        assert!(result.warning.is_some());
        assert_eq!(result.script, "Slot 1: I have no slot.");
    }

    #[test]
    fn voice_override_by_character_name_replaces_default_for_its_slot() {
        let story = Story {
            title: "Test".into(),
            characters: vec!["Kaveh".into()],
            chapters: vec![Chapter {
                lines: vec![Line {
                    speaker: "Kaveh".into(),
                    text: "Hi.".into(),
                }],
            }],
        };
        let mut overrides = VoiceOverrides::new();
        overrides.insert("Kaveh".to_string(), "en-David_man".to_string());

        let result = format_structured(&story, &test_config(), Some(&overrides));
        let kaveh_slot = result.speaker_map["Kaveh"];
        let idx = result.slots_used.iter().position(|s| *s == kaveh_slot).unwrap();
        assert_eq!(result.voices[idx], "en-David_man");
    }
}
