//! ffmpeg invocations, bounded by a semaphore.

use meridian_error::{MeridianResult, RenderError, RenderErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;

fn transcode_err(message: impl Into<String>) -> RenderError {
    RenderError::new(RenderErrorKind::Transcode(message.into()))
}

/// Runs ffmpeg on in-memory media through a scratch directory.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    path: PathBuf,
    permits: Arc<Semaphore>,
}

impl Ffmpeg {
    /// Use the binary at `path`, running at most `concurrency` processes.
    pub fn new(path: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            path: path.into(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Move the MP4 index to the front for progressive playback.
    pub async fn faststart(&self, bytes: &[u8]) -> MeridianResult<Vec<u8>> {
        self.run(bytes, "mp4", &["-c", "copy", "-movflags", "+faststart"], "mp4")
            .await
    }

    /// Overwrite the ARTIST and TITLE tags without re-encoding.
    pub async fn tag_audio(&self, bytes: &[u8], artist: &str, title: &str) -> MeridianResult<Vec<u8>> {
        let artist = format!("artist={}", artist);
        let title = format!("title={}", title);
        self.run(
            bytes,
            "mp3",
            &["-c", "copy", "-metadata", &artist, "-metadata", &title],
            "mp3",
        )
        .await
    }

    #[tracing::instrument(skip(self, bytes, args), fields(size = bytes.len()))]
    async fn run(
        &self,
        bytes: &[u8],
        input_ext: &str,
        args: &[&str],
        output_ext: &str,
    ) -> MeridianResult<Vec<u8>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| transcode_err("ffmpeg pool closed"))?;

        let scratch = tempfile::tempdir().map_err(|e| transcode_err(e.to_string()))?;
        let input = scratch.path().join(format!("in.{}", input_ext));
        let output = scratch.path().join(format!("out.{}", output_ext));
        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| transcode_err(e.to_string()))?;

        let result = Command::new(&self.path)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(&input)
            .args(args)
            .arg(&output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| transcode_err(format!("spawning {}: {}", self.path.display(), e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            tracing::warn!(status = ?result.status.code(), stderr = %tail, "ffmpeg failed");
            return Err(transcode_err(tail).into());
        }

        let out = tokio::fs::read(&output)
            .await
            .map_err(|e| transcode_err(e.to_string()))?;
        tracing::debug!(output_size = out.len(), "ffmpeg finished");
        Ok(out)
    }
}
