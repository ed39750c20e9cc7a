use crate::error::Result;
use crate::models::{Story, StoryInput};
use crate::services::object_store::ObjectStore;
use async_trait::async_trait;

/// Supplies the structured story for a (user, session) pair. The story
/// pipeline that produces this content is an external collaborator; this
/// crate only consumes its output through this narrow interface, with a
/// plain-text fallback when no structured story is available.
#[async_trait]
pub trait StoryLoader: Send + Sync {
    async fn load(&self, user_id: &str, session_id: &str) -> Result<StoryInput>;
}

/// Reads `story.json` (structured) falling back to `story.txt` (plain text)
/// from the object store, matching the layout the story pipeline writes
/// alongside the audio assets this crate owns.
pub struct ObjectStoreLoader {
    store: ObjectStore,
}

impl ObjectStoreLoader {
    pub fn new(store: ObjectStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoryLoader for ObjectStoreLoader {
    async fn load(&self, user_id: &str, session_id: &str) -> Result<StoryInput> {
        let prefix = self.store.key_prefix(user_id, session_id);

        if let Some(bytes) = self.store.get(&format!("{prefix}story.json")).await? {
            match serde_json::from_slice::<Story>(&bytes) {
                Ok(story) => return Ok(StoryInput::Structured(story)),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse structured story; falling back to plain text");
                }
            }
        }

        if let Some(bytes) = self.store.get(&format!("{prefix}story.txt")).await? {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Ok(StoryInput::PlainText(text));
        }

        Err(crate::error::AppError::NotFound(format!(
            "story not found for session {session_id}"
        )))
    }
}
