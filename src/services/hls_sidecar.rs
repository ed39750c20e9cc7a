use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::{timeout, Duration};

const TERMINATE_GRACE: Duration = Duration::from_secs(10);
const KILL_GRACE: Duration = Duration::from_secs(3);

const SAMPLE_RATE: &str = "24000";
const SEGMENT_DURATION_SECS: &str = "2";
const SEGMENT_BITRATE: &str = "128k";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarState {
    Running,
    Faulted,
}

/// Wraps the external `ffmpeg` process that turns the same PCM stream the
/// progressive WAV receives into a live HLS playlist + MPEG-TS segments.
/// Owned exclusively by the orchestrator's read loop; not `Clone`, not `Sync`.
pub struct HlsSidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    state: SidecarState,
}

impl HlsSidecar {
    /// Spawns ffmpeg with stdin piped and stdout/stderr discarded. Must be
    /// called before the first upstream TTS byte arrives so the child is
    /// already waiting on its stdin (minimizes first-segment latency).
    pub async fn spawn(hls_dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(hls_dir).await?;

        let segment_filename = hls_dir.join("segment_%03d.ts");
        let playlist_path = hls_dir.join("stream.m3u8");

        let mut child = Command::new("ffmpeg")
            .args([
                "-f", "s16le",
                "-ar", SAMPLE_RATE,
                "-ac", "1",
                "-i", "-",
                "-codec:a", "libmp3lame",
                "-b:a", SEGMENT_BITRATE,
                "-f", "hls",
                "-hls_time", SEGMENT_DURATION_SECS,
                "-hls_list_size", "0",
                "-hls_flags", "append_list+independent_segments",
                "-hls_segment_type", "mpegts",
            ])
            .arg("-hls_segment_filename")
            .arg(&segment_filename)
            .args(["-hls_playlist_type", "event", "-y"])
            .arg(&playlist_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take();

        Ok(Self {
            child,
            stdin,
            state: SidecarState::Running,
        })
    }

    pub fn state(&self) -> SidecarState {
        self.state
    }

    pub fn is_faulted(&self) -> bool {
        self.state == SidecarState::Faulted
    }

    /// Writes PCM bytes to the child's stdin. A broken pipe transitions the
    /// sidecar to `faulted` rather than failing the caller; the progressive
    /// WAV sink is unaffected.
    pub async fn write(&mut self, bytes: &[u8]) {
        if self.state == SidecarState::Faulted {
            return;
        }

        let Some(stdin) = self.stdin.as_mut() else {
            self.state = SidecarState::Faulted;
            return;
        };

        if let Err(err) = stdin.write_all(bytes).await {
            if err.kind() == std::io::ErrorKind::BrokenPipe {
                tracing::warn!("HLS sidecar stdin pipe broken; marking sidecar faulted");
            } else {
                tracing::warn!(error = %err, "HLS sidecar stdin write failed; marking sidecar faulted");
            }
            self.state = SidecarState::Faulted;
            self.stdin = None;
        }
    }

    /// Closes stdin, then waits up to 10s, SIGTERMs and waits up to 3s more,
    /// then SIGKILLs. A non-zero exit is logged, not treated as an error.
    pub async fn shutdown(mut self) {
        drop(self.stdin.take());

        if let Ok(status) = timeout(TERMINATE_GRACE, self.child.wait()).await {
            log_exit(status);
            return;
        }

        if let Some(pid) = self.child.id() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        if let Ok(status) = timeout(KILL_GRACE, self.child.wait()).await {
            log_exit(status);
            return;
        }

        tracing::warn!("HLS sidecar did not exit after SIGTERM; sending SIGKILL");
        let _ = self.child.start_kill();
        let status = self.child.wait().await;
        log_exit(status);
    }
}

fn log_exit(status: std::io::Result<std::process::ExitStatus>) {
    match status {
        Ok(status) if status.success() => tracing::debug!("HLS sidecar exited cleanly"),
        Ok(status) => tracing::warn!(?status, "HLS sidecar exited non-zero"),
        Err(err) => tracing::warn!(error = %err, "failed to observe HLS sidecar exit status"),
    }
}

/// Local filesystem layout for one session's audio assets.
pub struct SessionPaths {
    pub audio_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(storage_root: &str, session_id: &str) -> Self {
        Self {
            audio_dir: PathBuf::from(storage_root).join("audio").join(session_id),
        }
    }

    pub fn progressive_wav(&self) -> PathBuf {
        self.audio_dir.join("progressive.wav")
    }

    pub fn final_mp3(&self) -> PathBuf {
        self.audio_dir.join("final.mp3")
    }

    pub fn hls_dir(&self) -> PathBuf {
        self.audio_dir.join("hls")
    }

    pub fn playlist(&self) -> PathBuf {
        self.hls_dir().join("stream.m3u8")
    }
}
