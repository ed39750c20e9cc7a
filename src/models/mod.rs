pub mod session;
pub mod story;

pub use session::{FileType, GenerateRequest, GenerateResponse, ResetResponse, Source, StatusResponse};
pub use story::{Chapter, Line, SpeakerMap, Story, StoryInput, VoiceMap, VoiceOverrides};
