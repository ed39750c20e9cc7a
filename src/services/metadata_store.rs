use crate::error::Result;
use crate::models::FileType;
use crate::services::object_store::ObjectStore;
use chrono::Utc;
use serde_json::{Map, Value};

const METADATA_CONTENT_TYPE: &str = "application/json";

/// Per-story key/value metadata, persisted as `metadata.json` through the
/// Object Store Adapter rather than a second database. Modeled as an open
/// JSON map: unknown fields written by the story pipeline round-trip
/// untouched through every read-modify-write cycle.
pub struct MetadataStore {
    store: ObjectStore,
}

impl MetadataStore {
    pub fn new(store: ObjectStore) -> Self {
        Self { store }
    }

    fn key(&self, user_id: &str, story_id: &str) -> String {
        format!("{}metadata.json", self.store.key_prefix(user_id, story_id))
    }

    pub async fn load(&self, user_id: &str, story_id: &str) -> Result<Option<Map<String, Value>>> {
        let Some(bytes) = self.store.get(&self.key(user_id, story_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            _ => Ok(None),
        }
    }

    /// Read-modify-write: loads the existing document (or seeds a fresh one),
    /// applies `mutate`, stamps `updated_at`, and persists it.
    pub async fn upsert(
        &self,
        user_id: &str,
        story_id: &str,
        mutate: impl FnOnce(&mut Map<String, Value>),
    ) -> Result<Map<String, Value>> {
        let mut map = self.load(user_id, story_id).await?.unwrap_or_else(|| {
            let mut seed = Map::new();
            seed.insert("session_id".into(), Value::String(story_id.to_string()));
            seed.insert("story_id".into(), Value::String(story_id.to_string()));
            seed.insert("user_id".into(), Value::String(user_id.to_string()));
            seed.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
            seed.insert("has_audio".into(), Value::Bool(false));
            seed.insert("has_images".into(), Value::Bool(false));
            seed
        });

        mutate(&mut map);
        map.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));

        let body = serde_json::to_vec(&Value::Object(map.clone()))
            .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!(e)))?;
        self.store
            .put(&self.key(user_id, story_id), body, METADATA_CONTENT_TYPE)
            .await?;

        Ok(map)
    }

    pub async fn mark_audio_generating(&self, user_id: &str, story_id: &str) -> Result<()> {
        self.upsert(user_id, story_id, |m| {
            m.insert("status".into(), Value::String("generating".into()));
        })
        .await?;
        Ok(())
    }

    pub async fn mark_audio_ready(&self, user_id: &str, story_id: &str, file_type: FileType) -> Result<()> {
        self.upsert(user_id, story_id, |m| {
            m.insert("status".into(), Value::String("ready".into()));
            m.insert("file_type".into(), Value::String(file_type.as_str().into()));
            m.insert("has_audio".into(), Value::Bool(true));
            m.insert("audio_updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        })
        .await?;
        Ok(())
    }
}
