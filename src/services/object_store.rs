use crate::config::Config;
use crate::error::{AppError, Result};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;

pub const PRESIGN_TTL_SECONDS: u64 = 3600;
const DELETE_BATCH_SIZE: usize = 1000;

/// Thin wrapper over the object-store SDK. All keys this adapter touches are
/// already namespaced `<base>/users/<user_id>/stories/<story_id>/...` by the
/// caller (see `key_prefix`); this type does not itself know about sessions.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
    base_prefix: String,
}

impl ObjectStore {
    pub async fn from_config(config: &Config) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .load()
            .await;
        let client = Client::new(&sdk_config);

        Self {
            client,
            bucket: config.s3_bucket.clone(),
            base_prefix: config.s3_base_prefix.clone(),
        }
    }

    /// `<base>/users/<user_id>/stories/<story_id>/`
    pub fn key_prefix(&self, user_id: &str, story_id: &str) -> String {
        format!(
            "{}/users/{}/stories/{}/",
            self.base_prefix.trim_matches('/'),
            user_id,
            story_id
        )
    }

    pub async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::TransientStoreError(e.to_string()))?
                    .into_bytes();
                Ok(Some(bytes.to_vec()))
            }
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(classify_sdk_error(err)),
        }
    }

    /// HEAD the key, returning its size if present, `None` if absent.
    pub async fn head_size(&self, key: &str) -> Result<Option<u64>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(output.content_length().map(|n| n.max(0) as u64)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(classify_sdk_error(err)),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head_size(key).await?.is_some())
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(classify_sdk_error)?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            if output.is_truncated().unwrap_or(false) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(keys)
    }

    /// Deletes every object under `prefix`, in batches of up to 1000 keys.
    /// Fails closed: any batch failure aborts with `PermanentStoreError`.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let keys = self.list(prefix).await?;

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let objects: std::result::Result<Vec<_>, _> = batch
                .iter()
                .map(|key| {
                    aws_sdk_s3::types::ObjectIdentifier::builder()
                        .key(key)
                        .build()
                })
                .collect();
            let objects = objects.map_err(|e| AppError::PermanentStoreError(e.to_string()))?;

            let delete = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| AppError::PermanentStoreError(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| AppError::PermanentStoreError(e.to_string()))?;
        }

        Ok(())
    }

    pub async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(classify_sdk_error)?;

        Ok(presigned.uri().to_string())
    }
}

fn is_not_found<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    // Service errors surface as a typed variant (NoSuchKey/NotFound); anything
    // that isn't a recognizable service error is treated conservatively as
    // "not a not-found" so callers don't silently swallow real failures.
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

fn classify_sdk_error<E: std::fmt::Debug>(err: aws_sdk_s3::error::SdkError<E>) -> AppError {
    match &err {
        aws_sdk_s3::error::SdkError::TimeoutError(_)
        | aws_sdk_s3::error::SdkError::DispatchFailure(_) => {
            AppError::TransientStoreError(format!("{err:?}"))
        }
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() >= 500 =>
        {
            AppError::TransientStoreError(format!("{err:?}"))
        }
        _ => AppError::PermanentStoreError(format!("{err:?}")),
    }
}
