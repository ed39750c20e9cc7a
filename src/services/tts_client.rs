use crate::config::Config;
use crate::error::{AppError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Total request timeout. reqwest has no separate read/write/pool knobs, so
/// the 20-minute long-read budget is applied as the overall request timeout
/// and the connect budget collapses into `connect_timeout`.
const TOTAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(1200);
const VOICES_TIMEOUT: Duration = Duration::from_secs(30);
const CFG_SCALE: f64 = 1.3;
const WAV_HEADER_LEN: usize = 44;

#[derive(Serialize)]
struct GenerateRequestBody<'a> {
    script: &'a str,
    speaker_voices: &'a [String],
    cfg_scale: f64,
    session_id: &'a str,
    speaker_mapping: Option<HashMap<String, String>>,
    voice_overrides: Option<&'a HashMap<String, String>>,
}

struct CachedVoices {
    voices: Value,
    fetched_at: Instant,
}

/// Streams raw PCM audio from the upstream TTS service and caches its voice
/// catalog. Constructed once at process start and shared via `Arc` — no
/// process-wide singleton, no module-level static.
pub struct TtsClient {
    http: reqwest::Client,
    base_url: String,
    default_api_key: Option<String>,
    voice_cache: Arc<RwLock<HashMap<String, CachedVoices>>>,
}

impl TtsClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_REQUEST_TIMEOUT)
            .build()
            .expect("failed to build TTS HTTP client");

        Self {
            http,
            base_url: config.tts_base_url.trim_end_matches('/').to_string(),
            default_api_key: config.tts_api_key.clone(),
            voice_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn resolve_api_key<'a>(&'a self, override_key: Option<&'a str>) -> Option<&'a str> {
        override_key.or(self.default_api_key.as_deref())
    }

    /// Opens the long-lived POST and returns a stream that has already had
    /// the leading 44-byte WAV header stripped from its first real chunk.
    #[allow(clippy::too_many_arguments)]
    pub async fn stream_audio_generation(
        &self,
        script: &str,
        speaker_voices: &[String],
        session_id: &str,
        speaker_mapping: Option<HashMap<String, String>>,
        voice_overrides: Option<&HashMap<String, String>>,
        api_key_override: Option<&str>,
    ) -> Result<TtsStream> {
        let api_key = self
            .resolve_api_key(api_key_override)
            .ok_or_else(|| AppError::InputInvalid("missing upstream TTS API key".to_string()))?;

        let body = GenerateRequestBody {
            script,
            speaker_voices,
            cfg_scale: CFG_SCALE,
            session_id,
            speaker_mapping,
            voice_overrides,
        };

        let response = self
            .http
            .post(format!("{}/generate/stream", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout
                } else {
                    AppError::Reqwest(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamRejected { status, body });
        }

        let stream = response.bytes_stream().map(|r| r.map_err(AppError::Reqwest));
        Ok(TtsStream::new(Box::pin(stream)))
    }

    /// Fetches (and caches, keyed by upstream API key) the voice catalog. On
    /// upstream failure, serves a stale cached entry for that key instead of
    /// failing outright, if one exists.
    pub async fn get_voice_catalog(
        &self,
        force_refresh: bool,
        api_key_override: Option<&str>,
    ) -> Result<Value> {
        let api_key = self
            .resolve_api_key(api_key_override)
            .ok_or_else(|| AppError::InputInvalid("missing upstream TTS API key".to_string()))?
            .to_string();

        if !force_refresh {
            if let Some(cached) = self.voice_cache.read().await.get(&api_key) {
                return Ok(cached.voices.clone());
            }
        }

        match self.fetch_voices(&api_key).await {
            Ok(voices) => {
                self.voice_cache.write().await.insert(
                    api_key,
                    CachedVoices { voices: voices.clone(), fetched_at: Instant::now() },
                );
                Ok(voices)
            }
            Err(err) => {
                if let Some(cached) = self.voice_cache.read().await.get(&api_key) {
                    tracing::warn!(error = %err, age_secs = cached.fetched_at.elapsed().as_secs(), "voice catalog refresh failed; serving stale cache");
                    return Ok(cached.voices.clone());
                }
                Err(err)
            }
        }
    }

    async fn fetch_voices(&self, api_key: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/voices", self.base_url))
            .bearer_auth(api_key)
            .timeout(VOICES_TIMEOUT)
            .send()
            .await
            .map_err(AppError::Reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamRejected { status, body });
        }

        response.json::<Value>().await.map_err(AppError::Reqwest)
    }
}

/// Iterates raw response bytes from an open TTS generation stream, stripping
/// the leading 44-byte WAV header from the first real (non-short) chunk.
pub struct TtsStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
    header_stripped: bool,
    short_first_chunk_logged: bool,
    pub chunks_received: u64,
}

impl TtsStream {
    fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>) -> Self {
        Self {
            inner,
            header_stripped: false,
            short_first_chunk_logged: false,
            chunks_received: 0,
        }
    }

    /// Returns the next PCM chunk, or `None` at end of stream.
    ///
    /// A body error here means the connection closed or reset mid-stream
    /// rather than at a natural EOF; that's reported as `UpstreamTruncated`
    /// carrying the chunk count already received, not the raw transport
    /// error, so callers can tell a clean finish from a dropped connection.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(chunk) = self.inner.next().await else {
                return Ok(None);
            };
            let chunk = chunk.map_err(|_| AppError::UpstreamTruncated { chunks: self.chunks_received })?;

            if !self.header_stripped {
                if chunk.len() < WAV_HEADER_LEN {
                    if !self.short_first_chunk_logged {
                        tracing::warn!(
                            len = chunk.len(),
                            "first TTS chunk shorter than a WAV header; discarding"
                        );
                        self.short_first_chunk_logged = true;
                    }
                    continue;
                }
                self.header_stripped = true;
                self.chunks_received += 1;
                return Ok(Some(chunk.slice(WAV_HEADER_LEN..)));
            }

            self.chunks_received += 1;
            return Ok(Some(chunk));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn make_stream(chunks: Vec<Bytes>) -> TtsStream {
        let s = stream::iter(chunks.into_iter().map(Ok::<_, AppError>));
        TtsStream::new(Box::pin(s))
    }

    #[tokio::test]
    async fn strips_44_byte_header_from_first_chunk() {
        let header = Bytes::from(vec![0u8; 44]);
        let pcm = Bytes::from(vec![7u8; 10]);
        let mut combined = header.to_vec();
        combined.extend_from_slice(&pcm);

        let mut s = make_stream(vec![Bytes::from(combined), Bytes::from(vec![9u8; 4])]);
        let first = s.next_chunk().await.unwrap().unwrap();
        assert_eq!(first, pcm);
        let second = s.next_chunk().await.unwrap().unwrap();
        assert_eq!(second, Bytes::from(vec![9u8; 4]));
        assert_eq!(s.chunks_received, 2);
    }

    #[tokio::test]
    async fn discards_too_short_first_chunk_and_strips_header_from_next() {
        let mut s = make_stream(vec![
            Bytes::from(vec![1u8; 10]),
            Bytes::from(vec![2u8; 44 + 5]),
        ]);
        let first = s.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(s.chunks_received, 1);
    }

    #[tokio::test]
    async fn empty_stream_yields_none() {
        let mut s = make_stream(vec![]);
        assert!(s.next_chunk().await.unwrap().is_none());
    }
}
