use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{FileType, GenerateRequest, GenerateResponse, Source, SpeakerMap, StatusResponse};
use crate::services::hls_sidecar::{HlsSidecar, SessionPaths};
use crate::services::metadata_store::MetadataStore;
use crate::services::object_store::{ObjectStore, PRESIGN_TTL_SECONDS};
use crate::services::script_formatter::{self, FormattedScript};
use crate::services::segment_uploader::{self, SegmentUploader};
use crate::services::story_loader::StoryLoader;
use crate::services::tts_client::TtsClient;
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const PROGRESSIVE_PATCH_CADENCE: u64 = 50;
const GENERATING_FRESH_WINDOW: Duration = Duration::from_secs(30);
const STATUS_WAV_IDLE_WINDOW: Duration = Duration::from_secs(3);
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(60);
const FINAL_MP3_BITRATE: &str = "192k";

/// Where the HTTP layer should read bytes from for `GET /stream/{session}`.
pub enum PlayableLocation {
    Local { path: std::path::PathBuf, file_type: FileType },
    Redirect(String),
    NotFound,
}

/// Drives one generation under a root cancellation scope: the TTS reader +
/// fan-out loop (T1), the HLS sidecar process (T2), and the segment
/// watcher/uploader (T3). Cheaply `Clone`, so a handle can be moved into the
/// detached `tokio::spawn`'d generation task.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    store: ObjectStore,
    tts: Arc<TtsClient>,
    metadata: Arc<MetadataStore>,
    story_loader: Arc<dyn StoryLoader>,
    /// In-memory guard against a duplicate spawn racing the filesystem-based
    /// Start checks below, in the narrow window before `progressive.wav`
    /// exists on disk. Scoped to one process; never held across an `.await`.
    active: Arc<RwLock<HashSet<(String, String)>>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        store: ObjectStore,
        tts: Arc<TtsClient>,
        metadata: Arc<MetadataStore>,
        story_loader: Arc<dyn StoryLoader>,
    ) -> Self {
        Self {
            config,
            store,
            tts,
            metadata,
            story_loader,
            active: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn session_paths(&self, session_id: &str) -> SessionPaths {
        SessionPaths::new(&self.config.storage_root, session_id)
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// `GET /status/{session}` — same artifact priority as the Start check,
    /// but reported rather than acted on.
    pub async fn status(&self, user_id: &str, session_id: &str) -> Result<StatusResponse> {
        let prefix = self.store.key_prefix(user_id, session_id);

        let final_key = format!("{prefix}audio/final.mp3");
        if self.store.exists(&final_key).await? {
            let url = self.store.presign_get(&final_key, Duration::from_secs(PRESIGN_TTL_SECONDS)).await?;
            return Ok(StatusResponse::Ready { url, file_type: FileType::Mp3, source: Source::Store });
        }

        let wav_key = format!("{prefix}audio/progressive.wav");
        if self.store.exists(&wav_key).await? {
            let url = self.store.presign_get(&wav_key, Duration::from_secs(PRESIGN_TTL_SECONDS)).await?;
            return Ok(StatusResponse::Generating { url: Some(url), file_type: FileType::Wav, source: Source::Store });
        }

        let paths = self.session_paths(session_id);
        if paths.final_mp3().exists() {
            return Ok(StatusResponse::Ready {
                url: format!("/api/v1/audio/stream/{session_id}"),
                file_type: FileType::Mp3,
                source: Source::Local,
            });
        }

        if let Ok(meta) = tokio::fs::metadata(paths.progressive_wav()).await {
            let idle = meta.modified().ok().and_then(|m| m.elapsed().ok()).unwrap_or(Duration::ZERO);
            let url = format!("/api/v1/audio/stream/{session_id}");
            return Ok(if idle > STATUS_WAV_IDLE_WINDOW {
                StatusResponse::Ready { url, file_type: FileType::Wav, source: Source::Local }
            } else {
                StatusResponse::Generating { url: Some(url), file_type: FileType::Wav, source: Source::Local }
            });
        }

        Ok(StatusResponse::NotGenerated)
    }

    /// `GET /stream/{session}` — prefers a local file (so a still-growing WAV
    /// can be served with range requests); falls back to a presigned redirect
    /// when only the object store has the artifact (e.g. after a restart).
    pub async fn resolve_playable(&self, user_id: &str, session_id: &str) -> Result<PlayableLocation> {
        let paths = self.session_paths(session_id);
        if paths.final_mp3().exists() {
            return Ok(PlayableLocation::Local { path: paths.final_mp3(), file_type: FileType::Mp3 });
        }
        if paths.progressive_wav().exists() {
            return Ok(PlayableLocation::Local { path: paths.progressive_wav(), file_type: FileType::Wav });
        }

        let prefix = self.store.key_prefix(user_id, session_id);
        let final_key = format!("{prefix}audio/final.mp3");
        if self.store.exists(&final_key).await? {
            let url = self.store.presign_get(&final_key, Duration::from_secs(PRESIGN_TTL_SECONDS)).await?;
            return Ok(PlayableLocation::Redirect(url));
        }
        let wav_key = format!("{prefix}audio/progressive.wav");
        if self.store.exists(&wav_key).await? {
            let url = self.store.presign_get(&wav_key, Duration::from_secs(PRESIGN_TTL_SECONDS)).await?;
            return Ok(PlayableLocation::Redirect(url));
        }

        Ok(PlayableLocation::NotFound)
    }

    /// `GET /hls/{session}/stream.m3u8` — store-resident playlist bytes, or
    /// the local file.
    pub async fn hls_playlist(&self, user_id: &str, session_id: &str) -> Result<Option<Vec<u8>>> {
        let prefix = self.store.key_prefix(user_id, session_id);
        let key = format!("{prefix}audio/hls/stream.m3u8");
        if let Some(bytes) = self.store.get(&key).await? {
            return Ok(Some(bytes));
        }

        let path = self.session_paths(session_id).playlist();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    /// `GET /hls/{session}/{segment}.ts` — a presigned redirect if
    /// store-resident, else the local path to serve directly.
    pub async fn hls_segment(&self, user_id: &str, session_id: &str, segment_name: &str) -> Result<PlayableLocation> {
        let prefix = self.store.key_prefix(user_id, session_id);
        let key = format!("{prefix}audio/hls/{segment_name}");
        if self.store.exists(&key).await? {
            let url = self.store.presign_get(&key, Duration::from_secs(PRESIGN_TTL_SECONDS)).await?;
            return Ok(PlayableLocation::Redirect(url));
        }

        let path = self.session_paths(session_id).hls_dir().join(segment_name);
        if path.exists() {
            return Ok(PlayableLocation::Local { path, file_type: FileType::Mp3 });
        }

        Ok(PlayableLocation::NotFound)
    }

    pub async fn start_generation(
        &self,
        user_id: &str,
        session_id: &str,
        req: GenerateRequest,
    ) -> Result<GenerateResponse> {
        let force_regenerate = req.force_regenerate
            || matches!(&req.speaker_voice_overrides, Some(overrides) if !overrides.is_empty());

        let prefix = self.store.key_prefix(user_id, session_id);

        if !force_regenerate {
            if let Some(resp) = self.check_existing(&prefix, session_id).await? {
                return Ok(resp);
            }
        }

        if force_regenerate {
            self.reset(user_id, session_id).await?;
        }

        {
            let mut active = self.active.write().await;
            let key = (user_id.to_string(), session_id.to_string());
            if active.contains(&key) {
                return Ok(GenerateResponse::Generating {
                    session_id: session_id.to_string(),
                    url: None,
                    source: Source::Local,
                });
            }
            active.insert(key);
        }

        let handle = self.clone();
        let user_id = user_id.to_string();
        let session_id_owned = session_id.to_string();
        let overrides = req.speaker_voice_overrides.clone();
        let api_key_override = req.tech42_tts_api_key.clone();

        tokio::spawn(async move {
            handle
                .run_generation(&user_id, &session_id_owned, overrides, api_key_override)
                .await;
            handle
                .active
                .write()
                .await
                .remove(&(user_id, session_id_owned));
        });

        Ok(GenerateResponse::Started {
            session_id: session_id.to_string(),
        })
    }

    /// Steps 1-4 of the Start check: existing store/local artifacts short
    /// circuit a fresh generation. `None` means "no existing artifact found,
    /// proceed to spawn".
    async fn check_existing(&self, prefix: &str, session_id: &str) -> Result<Option<GenerateResponse>> {
        let final_key = format!("{prefix}audio/final.mp3");
        if self.store.exists(&final_key).await? {
            let url = self
                .store
                .presign_get(&final_key, Duration::from_secs(PRESIGN_TTL_SECONDS))
                .await?;
            return Ok(Some(GenerateResponse::Ready {
                session_id: session_id.to_string(),
                url,
                source: Source::Store,
            }));
        }

        let wav_key = format!("{prefix}audio/progressive.wav");
        if self.store.exists(&wav_key).await? {
            let url = self
                .store
                .presign_get(&wav_key, Duration::from_secs(PRESIGN_TTL_SECONDS))
                .await?;
            return Ok(Some(GenerateResponse::Generating {
                session_id: session_id.to_string(),
                url: Some(url),
                source: Source::Store,
            }));
        }

        let paths = self.session_paths(session_id);
        if paths.final_mp3().exists() {
            return Ok(Some(GenerateResponse::Ready {
                session_id: session_id.to_string(),
                url: format!("/api/v1/audio/stream/{session_id}"),
                source: Source::Local,
            }));
        }

        if let Ok(meta) = tokio::fs::metadata(paths.progressive_wav()).await {
            if let Ok(modified) = meta.modified() {
                if modified.elapsed().unwrap_or(Duration::MAX) < GENERATING_FRESH_WINDOW {
                    return Ok(Some(GenerateResponse::Generating {
                        session_id: session_id.to_string(),
                        url: None,
                        source: Source::Local,
                    }));
                }
            }
        }

        Ok(None)
    }

    pub async fn reset(&self, user_id: &str, session_id: &str) -> Result<()> {
        let paths = self.session_paths(session_id);
        if paths.audio_dir.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&paths.audio_dir).await {
                tracing::error!(session_id, error = %err, "failed to remove local audio directory during reset");
            }
        }

        let prefix = format!("{}audio/", self.store.key_prefix(user_id, session_id));
        self.store.delete_prefix(&prefix).await.map_err(|err| {
            AppError::PermanentStoreError(format!("reset failed to clear object store: {err}"))
        })?;

        Ok(())
    }

    /// Background task body. Never propagates an error to its `tokio::spawn`
    /// caller — every failure is caught here, logged, and reflected only
    /// through the metadata store / Status endpoint.
    async fn run_generation(
        &self,
        user_id: &str,
        session_id: &str,
        overrides: Option<HashMap<String, String>>,
        api_key_override: Option<String>,
    ) {
        tracing::info!(user_id, session_id, "starting audio generation");
        if let Err(err) = self
            .run_generation_inner(user_id, session_id, overrides, api_key_override)
            .await
        {
            tracing::error!(user_id, session_id, error = %err, "generation ended with an error");
        }
    }

    async fn run_generation_inner(
        &self,
        user_id: &str,
        session_id: &str,
        overrides: Option<HashMap<String, String>>,
        api_key_override: Option<String>,
    ) -> Result<()> {
        if let Err(err) = self.metadata.mark_audio_generating(user_id, session_id).await {
            tracing::warn!(session_id, error = %err, "failed to mark session generating in metadata store");
        }

        let story = self.story_loader.load(user_id, session_id).await?;
        let formatted = script_formatter::format_script(&story, &self.config, overrides.as_ref());
        if let Some(warning) = &formatted.warning {
            tracing::warn!(session_id, %warning, "script formatter warning");
        }

        let paths = self.session_paths(session_id);
        tokio::fs::create_dir_all(&paths.audio_dir).await?;

        let wav_path = paths.progressive_wav();
        tokio::fs::write(&wav_path, crate::services::wav_framer::make_header(24_000, 1, 16, 0)).await?;

        let mut sidecar = HlsSidecar::spawn(&paths.hls_dir()).await?;

        let key_prefix = self.store.key_prefix(user_id, session_id);
        let cancel = CancellationToken::new();
        let uploader = SegmentUploader::new(paths.hls_dir(), key_prefix.clone(), self.store.clone());
        let uploader_handle = tokio::spawn(uploader.run(cancel.clone()));

        let (run_result, chunks_received, total_bytes) = self
            .drive_stream(session_id, &formatted, overrides.as_ref(), api_key_override.as_deref(), &wav_path, &mut sidecar)
            .await;

        // Finalize regardless of how the read loop ended: patch the WAV
        // header one last time, tear down the sidecar, and let the uploader
        // drain before reconciliation runs.
        let _ = crate::services::wav_framer::patch_sizes(&wav_path, total_bytes as u32);
        sidecar.shutdown().await;
        cancel.cancel();
        let _ = uploader_handle.await;
        if let Err(err) = segment_uploader::reconcile(&paths.hls_dir(), &key_prefix, &self.store).await {
            tracing::warn!(session_id, error = %err, "post-generation segment reconciliation failed");
        }

        if chunks_received == 0 {
            return run_result;
        }

        // Upload progressive.wav regardless of outcome so a partial capture
        // is still servable.
        if let Ok(bytes) = tokio::fs::read(&wav_path).await {
            if let Err(err) = self
                .store
                .put(&format!("{key_prefix}audio/progressive.wav"), bytes, "audio/wav")
                .await
            {
                tracing::warn!(session_id, error = %err, "failed to upload progressive WAV");
            }
        }

        match run_result {
            Ok(()) => {
                match self.transcode_to_mp3(&wav_path, &paths.final_mp3()).await {
                    Ok(()) => {
                        if let Ok(bytes) = tokio::fs::read(paths.final_mp3()).await {
                            if let Err(err) = self
                                .store
                                .put(&format!("{key_prefix}audio/final.mp3"), bytes, "audio/mpeg")
                                .await
                            {
                                tracing::warn!(session_id, error = %err, "failed to upload final MP3");
                            }
                        }
                        if let Err(err) = self.metadata.mark_audio_ready(user_id, session_id, FileType::Mp3).await {
                            tracing::warn!(session_id, error = %err, "failed to mark session ready (mp3) in metadata store");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(session_id, error = %err, "MP3 transcode failed; session stays ready as WAV");
                        if let Err(err) = self.metadata.mark_audio_ready(user_id, session_id, FileType::Wav).await {
                            tracing::warn!(session_id, error = %err, "failed to mark session ready (wav) in metadata store");
                        }
                    }
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(session_id, chunks_received, error = %err, "TTS stream failed after partial capture; finalizing as WAV");
                if let Err(meta_err) = self.metadata.mark_audio_ready(user_id, session_id, FileType::Wav).await {
                    tracing::warn!(session_id, error = %meta_err, "failed to mark session ready (wav) in metadata store");
                }
                Ok(())
            }
        }
    }

    async fn drive_stream(
        &self,
        session_id: &str,
        formatted: &FormattedScript,
        overrides: Option<&HashMap<String, String>>,
        api_key_override: Option<&str>,
        wav_path: &std::path::Path,
        sidecar: &mut HlsSidecar,
    ) -> (Result<()>, u64, u64) {
        let mut wav_file = match tokio::fs::OpenOptions::new().append(true).open(wav_path).await {
            Ok(file) => file,
            Err(err) => return (Err(AppError::Io(err)), 0, 0),
        };

        let speaker_mapping = Some(speaker_map_to_wire(&formatted.speaker_map));

        let stream = self
            .tts
            .stream_audio_generation(
                &formatted.script,
                &formatted.voices,
                session_id,
                speaker_mapping,
                overrides,
                api_key_override,
            )
            .await;

        let mut tts_stream = match stream {
            Ok(stream) => stream,
            Err(err) => return (Err(err), 0, 0),
        };

        let mut total_bytes: u64 = 0;
        loop {
            match tts_stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(err) = wav_file.write_all(&chunk).await {
                        return (Err(AppError::Io(err)), tts_stream.chunks_received, total_bytes);
                    }
                    total_bytes += chunk.len() as u64;
                    sidecar.write(&chunk).await;

                    if tts_stream.chunks_received % PROGRESSIVE_PATCH_CADENCE == 0 {
                        let _ = wav_file.flush().await;
                        let _ = crate::services::wav_framer::patch_sizes(wav_path, total_bytes as u32);
                    }
                }
                Ok(None) => {
                    let _ = wav_file.flush().await;
                    return (Ok(()), tts_stream.chunks_received, total_bytes);
                }
                Err(err) => {
                    let _ = wav_file.flush().await;
                    return (Err(err), tts_stream.chunks_received, total_bytes);
                }
            }
        }
    }

    async fn transcode_to_mp3(&self, wav_path: &std::path::Path, mp3_path: &std::path::Path) -> Result<()> {
        let mut child = Command::new("ffmpeg")
            .arg("-i")
            .arg(wav_path)
            .args(["-codec:a", "libmp3lame", "-b:a", FINAL_MP3_BITRATE, "-ar", "24000", "-y"])
            .arg(mp3_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::TranscodeFailed(e.to_string()))?;

        let status = match tokio::time::timeout(TRANSCODE_TIMEOUT, child.wait()).await {
            Ok(status) => status.map_err(|e| AppError::TranscodeFailed(e.to_string()))?,
            Err(_) => {
                tracing::warn!("MP3 transcode exceeded 60s; terminating");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(AppError::TranscodeFailed("transcode timed out after 60s".to_string()));
            }
        };

        if !status.success() {
            return Err(AppError::TranscodeFailed(format!("ffmpeg exited with {status}")));
        }

        Ok(())
    }
}

fn speaker_map_to_wire(map: &SpeakerMap) -> HashMap<String, String> {
    map.iter().map(|(name, slot)| (name.clone(), format!("Slot {slot}"))).collect()
}
