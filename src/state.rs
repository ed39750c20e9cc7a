use crate::config::Config;
use crate::services::auth::AuthService;
use crate::services::metadata_store::MetadataStore;
use crate::services::object_store::ObjectStore;
use crate::services::orchestrator::Orchestrator;
use crate::services::story_loader::StoryLoader;
use crate::services::tts_client::TtsClient;
use std::sync::Arc;

/// Shared application state, built once at startup and handed to every
/// handler behind an `Arc`.
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_service: AuthService,
    pub store: ObjectStore,
    pub tts: Arc<TtsClient>,
    pub metadata: Arc<MetadataStore>,
    pub story_loader: Arc<dyn StoryLoader>,
    pub orchestrator: Orchestrator,
}
