use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Wav,
    Mp3,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Wav => "wav",
            FileType::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Local,
    Store,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub force_regenerate: bool,
    #[serde(default)]
    pub speaker_voice_overrides: Option<HashMap<String, String>>,
    #[serde(default)]
    pub tech42_tts_api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerateResponse {
    Started {
        session_id: String,
    },
    Ready {
        session_id: String,
        url: String,
        source: Source,
    },
    Generating {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        source: Source,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusResponse {
    Ready {
        url: String,
        file_type: FileType,
        source: Source,
    },
    Generating {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        file_type: FileType,
        source: Source,
    },
    NotGenerated,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub session_id: String,
}
