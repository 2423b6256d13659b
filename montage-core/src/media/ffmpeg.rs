use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::{LimitsSection, MediaSection};

use super::tool::{run_tool, status_error};
use super::{MediaError, MediaResult};

/// Cuts a single clip out of a local source file. Kept behind a trait so
/// the materializer can be exercised with a fake cutter in tests.
#[async_trait]
pub trait ClipCutter: Send + Sync {
    async fn cut(
        &self,
        source: &Path,
        start_seconds: f64,
        duration_seconds: f64,
        dest: &Path,
        keep_audio: bool,
    ) -> MediaResult<()>;
}

/// ffmpeg-backed editing operations: clip cutting and montage assembly.
#[derive(Debug, Clone)]
pub struct FfmpegEdit {
    ffmpeg: String,
    timeout: Duration,
}

impl FfmpegEdit {
    pub fn new(media: &MediaSection, limits: &LimitsSection) -> Self {
        Self {
            ffmpeg: media.ffmpeg_binary.clone(),
            timeout: Duration::from_secs(limits.command_timeout_seconds),
        }
    }

    /// Runs ffmpeg with the given arguments, mapping failure through
    /// `into_error` so callers keep their own taxonomy variant.
    pub async fn run<F>(&self, args: Vec<OsString>, into_error: F) -> MediaResult<()>
    where
        F: FnOnce(String) -> MediaError,
    {
        debug!(target: "ffmpeg", ?args, "running ffmpeg");
        let mut command = Command::new(&self.ffmpeg);
        command.args(&args);
        let output = run_tool("ffmpeg", &mut command, self.timeout).await?;
        if !output.status.success() {
            return Err(into_error(status_error("ffmpeg", &output)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClipCutter for FfmpegEdit {
    async fn cut(
        &self,
        source: &Path,
        start_seconds: f64,
        duration_seconds: f64,
        dest: &Path,
        keep_audio: bool,
    ) -> MediaResult<()> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-ss".into(),
            format!("{start_seconds}").into(),
            "-i".into(),
            source.as_os_str().to_os_string(),
            "-t".into(),
            format!("{duration_seconds}").into(),
            "-c:v".into(),
            "libx264".into(),
        ];
        if keep_audio {
            args.push("-c:a".into());
            args.push("aac".into());
        } else {
            args.push("-an".into());
        }
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());
        args.push(dest.as_os_str().to_os_string());
        self.run(args, MediaError::Extraction).await
    }
}
