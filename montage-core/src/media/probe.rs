use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::warn;

use crate::config::{LimitsSection, MediaSection};

use super::tool::{run_tool, status_error};
use super::{MediaError, MediaResult};

/// Rough origin classification of a source URL; drives which probing
/// tool is tried first and which fallback duration applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    VideoPlatform,
    CloudStorage,
    Direct,
}

impl SourceKind {
    pub fn classify(source: &str) -> Self {
        if source.contains("youtube.com") || source.contains("youtu.be") {
            SourceKind::VideoPlatform
        } else if source.contains("dropbox.com") || source.contains("drive.google.com") {
            SourceKind::CloudStorage
        } else {
            SourceKind::Direct
        }
    }
}

/// Probes a source's duration via ffprobe, or yt-dlp for platform URLs
/// that cannot be probed without downloading.
#[derive(Debug, Clone)]
pub struct DurationProber {
    ffprobe: String,
    ytdlp: String,
    timeout: Duration,
    fallback_platform: f64,
    fallback_cloud: f64,
    fallback_generic: f64,
}

impl DurationProber {
    pub fn new(media: &MediaSection, limits: &LimitsSection) -> Self {
        Self {
            ffprobe: media.ffprobe_binary.clone(),
            ytdlp: media.ytdlp_binary.clone(),
            timeout: Duration::from_secs(limits.command_timeout_seconds),
            fallback_platform: media.fallback_platform_seconds,
            fallback_cloud: media.fallback_cloud_seconds,
            fallback_generic: media.fallback_generic_seconds,
        }
    }

    /// Raw probe; fails with `DurationUnavailable` when the tool cannot
    /// produce a positive duration.
    pub async fn probe(&self, source: &str) -> MediaResult<f64> {
        match SourceKind::classify(source) {
            SourceKind::VideoPlatform => self.probe_ytdlp(source).await,
            _ => self.probe_ffprobe(source).await,
        }
    }

    /// Probe with the policy fallback applied instead of propagating the
    /// failure: 240s for video platforms, 120s for cloud-storage links,
    /// 60s otherwise.
    pub async fn probe_or_default(&self, source: &str) -> f64 {
        match self.probe(source).await {
            Ok(duration) => duration,
            Err(err) => self.fallback_for(source, source, &err),
        }
    }

    /// Probes an already-downloaded file, falling back per the policy of
    /// the URL it came from rather than the local path.
    pub async fn probe_local_or_default(&self, path: &std::path::Path, origin_url: &str) -> f64 {
        let source = path.display().to_string();
        match self.probe_ffprobe(&source).await {
            Ok(duration) => duration,
            Err(err) => self.fallback_for(&source, origin_url, &err),
        }
    }

    fn fallback_for(&self, source: &str, origin: &str, err: &MediaError) -> f64 {
        let fallback = match SourceKind::classify(origin) {
            SourceKind::VideoPlatform => self.fallback_platform,
            SourceKind::CloudStorage => self.fallback_cloud,
            SourceKind::Direct => self.fallback_generic,
        };
        warn!(
            target: "probe",
            source,
            fallback,
            "duration probe failed, applying fallback: {err}"
        );
        fallback
    }

    async fn probe_ffprobe(&self, source: &str) -> MediaResult<f64> {
        let mut command = Command::new(&self.ffprobe);
        command.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            source,
        ]);
        let output = run_tool("ffprobe", &mut command, self.timeout).await?;
        if !output.status.success() {
            return Err(MediaError::DurationUnavailable {
                src: source.to_string(),
                reason: status_error("ffprobe", &output),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_seconds(stdout.trim()).ok_or_else(|| MediaError::DurationUnavailable {
            src: source.to_string(),
            reason: format!("unparseable ffprobe output: {:?}", stdout.trim()),
        })
    }

    async fn probe_ytdlp(&self, source: &str) -> MediaResult<f64> {
        let mut command = Command::new(&self.ytdlp);
        command.args(["--get-duration", source]);
        let output = run_tool("yt-dlp", &mut command, self.timeout).await?;
        if !output.status.success() {
            return Err(MediaError::DurationUnavailable {
                src: source.to_string(),
                reason: status_error("yt-dlp", &output),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_clock_duration(stdout.trim()).ok_or_else(|| MediaError::DurationUnavailable {
            src: source.to_string(),
            reason: format!("unparseable yt-dlp duration: {:?}", stdout.trim()),
        })
    }
}

fn parse_seconds(raw: &str) -> Option<f64> {
    let value: f64 = raw.parse().ok()?;
    (value > 0.0).then_some(value)
}

/// Parses yt-dlp's `HH:MM:SS`, `MM:SS` or plain-seconds duration output.
pub fn parse_clock_duration(raw: &str) -> Option<f64> {
    let hms = Regex::new(r"^(\d+):(\d{1,2}):(\d{1,2})$").expect("static regex");
    let ms = Regex::new(r"^(\d+):(\d{1,2})$").expect("static regex");
    if let Some(caps) = hms.captures(raw) {
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        let total = hours * 3600.0 + minutes * 60.0 + seconds;
        return (total > 0.0).then_some(total);
    }
    if let Some(caps) = ms.captures(raw) {
        let minutes: f64 = caps[1].parse().ok()?;
        let seconds: f64 = caps[2].parse().ok()?;
        let total = minutes * 60.0 + seconds;
        return (total > 0.0).then_some(total);
    }
    parse_seconds(raw)
}
