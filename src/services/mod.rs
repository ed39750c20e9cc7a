pub mod auth;
pub mod hls_sidecar;
pub mod metadata_store;
pub mod object_store;
pub mod orchestrator;
pub mod script_formatter;
pub mod segment_uploader;
pub mod story_loader;
pub mod tts_client;
pub mod wav_framer;

pub use auth::AuthService;
pub use metadata_store::MetadataStore;
pub use object_store::ObjectStore;
pub use orchestrator::Orchestrator;
pub use story_loader::{ObjectStoreLoader, StoryLoader};
pub use tts_client::TtsClient;
