use crate::services::object_store::ObjectStore;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const STABILITY_WINDOW: Duration = Duration::from_millis(500);
const PLAYLIST_UPLOAD_INTERVAL: Duration = Duration::from_secs(2);
const MAX_BACKOFF_SECS: u64 = 30;
const MAX_BACKOFF_EXPONENT: u32 = 5;

const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// `min(2^min(failures, 5), 30)` seconds — the exponent itself is capped at 5
/// before the outer 30s ceiling applies, which differs from a naive
/// `min(2^failures, 30)` once failures exceeds 5.
pub fn backoff_seconds(failures: u32) -> u64 {
    let exponent = failures.min(MAX_BACKOFF_EXPONENT);
    (1u64 << exponent).min(MAX_BACKOFF_SECS)
}

#[derive(Clone, Copy)]
struct Observation {
    size: u64,
    mtime: SystemTime,
    stable_since: Instant,
}

/// Background task that watches one session's `hls/` directory, uploads new
/// stable segments at-most-once with backoff, and periodically re-uploads
/// the growing playlist. Confined to a single `tokio::spawn`'d task: the
/// `uploaded` set is never shared.
pub struct SegmentUploader {
    hls_dir: PathBuf,
    key_prefix: String,
    store: ObjectStore,
    uploaded: HashSet<String>,
    observations: HashMap<String, Observation>,
    failures: HashMap<String, u32>,
    next_attempt: HashMap<String, Instant>,
    last_playlist_upload: Option<Instant>,
}

impl SegmentUploader {
    pub fn new(hls_dir: PathBuf, key_prefix: String, store: ObjectStore) -> Self {
        Self {
            hls_dir,
            key_prefix,
            store,
            uploaded: HashSet::new(),
            observations: HashMap::new(),
            failures: HashMap::new(),
            next_attempt: HashMap::new(),
            last_playlist_upload: None,
        }
    }

    fn segment_key(&self, name: &str) -> String {
        format!("{}audio/hls/{name}", self.key_prefix)
    }

    fn playlist_key(&self) -> String {
        format!("{}audio/hls/stream.m3u8", self.key_prefix)
    }

    /// Drives the watch loop until `cancel` fires, then drains and returns.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.drain().await;
                    return;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&mut self) {
        let entries = match self.list_segments().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list HLS segment directory");
                return;
            }
        };

        for (name, size, mtime) in entries {
            if self.uploaded.contains(&name) || size == 0 {
                continue;
            }
            self.observe_and_maybe_upload(&name, size, mtime).await;
        }

        self.maybe_upload_playlist().await;
    }

    async fn observe_and_maybe_upload(&mut self, name: &str, size: u64, mtime: SystemTime) {
        let now = Instant::now();
        let changed = match self.observations.get(name) {
            Some(obs) => obs.size != size || obs.mtime != mtime,
            None => true,
        };

        if changed {
            self.observations.insert(
                name.to_string(),
                Observation { size, mtime, stable_since: now },
            );
            return;
        }

        let stable_since = self.observations[name].stable_since;
        if now.duration_since(stable_since) < STABILITY_WINDOW {
            return;
        }

        if let Some(&next) = self.next_attempt.get(name) {
            if now < next {
                return;
            }
        }

        self.attempt_upload(name).await;
    }

    async fn attempt_upload(&mut self, name: &str) {
        let path = self.hls_dir.join(name);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(segment = name, error = %err, "failed to read segment for upload");
                return;
            }
        };

        match self.store.put(&self.segment_key(name), body, SEGMENT_CONTENT_TYPE).await {
            Ok(()) => {
                self.uploaded.insert(name.to_string());
                self.failures.remove(name);
                self.next_attempt.remove(name);
                self.observations.remove(name);
                tracing::debug!(segment = name, "uploaded HLS segment");
            }
            Err(err) => {
                let failures = self.failures.entry(name.to_string()).or_insert(0);
                *failures += 1;
                let delay = Duration::from_secs(backoff_seconds(*failures));
                self.next_attempt.insert(name.to_string(), Instant::now() + delay);
                tracing::warn!(segment = name, error = %err, failures = *failures, "segment upload failed; backing off");
            }
        }
    }

    async fn maybe_upload_playlist(&mut self) {
        if self.uploaded.is_empty() {
            return;
        }
        if let Some(last) = self.last_playlist_upload {
            if last.elapsed() < PLAYLIST_UPLOAD_INTERVAL {
                return;
            }
        }
        self.upload_playlist_now().await;
    }

    async fn upload_playlist_now(&mut self) {
        let playlist_path = self.hls_dir.join("stream.m3u8");
        match tokio::fs::read(&playlist_path).await {
            Ok(body) => {
                if let Err(err) = self.store.put(&self.playlist_key(), body, PLAYLIST_CONTENT_TYPE).await {
                    tracing::warn!(error = %err, "playlist upload failed");
                }
                self.last_playlist_upload = Some(Instant::now());
            }
            Err(err) => tracing::warn!(error = %err, "failed to read playlist for upload"),
        }
    }

    /// Best-effort final pass: upload every not-yet-uploaded segment
    /// regardless of its current stability state (the stability gate exists
    /// to avoid wasted attempts during normal operation; at drain time we
    /// instead favor getting bytes into the store before teardown, trusting
    /// the post-generation reconciliation pass to correct anything uploaded
    /// mid-write), then upload the final playlist unconditionally.
    async fn drain(&mut self) {
        let entries = match self.list_segments().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list HLS segment directory during drain");
                Vec::new()
            }
        };

        for (name, size, _mtime) in entries {
            if self.uploaded.contains(&name) || size == 0 {
                continue;
            }
            self.attempt_upload(&name).await;
        }

        self.upload_playlist_now().await;
    }

    async fn list_segments(&self) -> std::io::Result<Vec<(String, u64, SystemTime)>> {
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.hls_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err),
        };

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("segment_") || !name.ends_with(".ts") {
                continue;
            }
            let metadata = entry.metadata().await?;
            out.push((name, metadata.len(), metadata.modified()?));
        }

        Ok(out)
    }
}

/// For each local segment, HEAD the corresponding store key and re-upload on
/// a size mismatch. Zero-byte local segments are skipped with a warning.
/// Runs once after a generation ends; closes the gap the drain pass leaves.
pub async fn reconcile(hls_dir: &PathBuf, key_prefix: &str, store: &ObjectStore) -> std::io::Result<()> {
    let mut dir = match tokio::fs::read_dir(hls_dir).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("segment_") || !name.ends_with(".ts") {
            continue;
        }

        let metadata = entry.metadata().await?;
        if metadata.len() == 0 {
            tracing::warn!(segment = %name, "skipping zero-byte local segment during reconciliation");
            continue;
        }

        let key = format!("{key_prefix}audio/hls/{name}");
        let remote_size = store.head_size(&key).await.ok().flatten();

        if remote_size != Some(metadata.len()) {
            if let Ok(body) = tokio::fs::read(entry.path()).await {
                if let Err(err) = store.put(&key, body, SEGMENT_CONTENT_TYPE).await {
                    tracing::warn!(segment = %name, error = %err, "reconciliation re-upload failed");
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_non_decreasing_and_capped_at_thirty_seconds() {
        let values: Vec<u64> = (0..10).map(backoff_seconds).collect();
        assert_eq!(values, vec![1, 2, 4, 8, 16, 32_u64.min(30), 30, 30, 30, 30]);
        for window in values.windows(2) {
            assert!(window[1] >= window[0]);
        }
        assert!(values.iter().all(|&v| v <= MAX_BACKOFF_SECS));
    }

    #[test]
    fn backoff_exponent_itself_is_capped_before_the_outer_ceiling() {
        // 2^6 = 64 would already exceed 30; confirms the exponent cap at 5
        // (not just the final min-with-30) is what's driving the plateau.
        assert_eq!(backoff_seconds(6), 30);
        assert_eq!(backoff_seconds(5), 30);
        assert_eq!(backoff_seconds(4), 16);
    }
}
