use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::plan::{Layout, MontageRequest, Resolution};

/// Failures loading the montage configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct MontageConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
}

impl MontageConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub base_dir: String,
    pub scratch_dir: String,
    pub output_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            base_dir: ".".into(),
            scratch_dir: "scratch".into(),
            output_dir: "output".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub command_timeout_seconds: u64,
    pub download_timeout_seconds: u64,
    pub job_retention_minutes: i64,
    pub purge_interval_minutes: i64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            command_timeout_seconds: 120,
            download_timeout_seconds: 600,
            job_retention_minutes: 60,
            purge_interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
    pub ytdlp_binary: String,
    pub curl_binary: String,
    pub min_clip_bytes: u64,
    pub fallback_platform_seconds: f64,
    pub fallback_cloud_seconds: f64,
    pub fallback_generic_seconds: f64,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".into(),
            ffprobe_binary: "ffprobe".into(),
            ytdlp_binary: "yt-dlp".into(),
            curl_binary: "curl".into(),
            min_clip_bytes: 500,
            fallback_platform_seconds: 240.0,
            fallback_cloud_seconds: 120.0,
            fallback_generic_seconds: 60.0,
        }
    }
}

/// Operator-tunable submission defaults. Surfaces building a request
/// start from [`DefaultsSection::base_request`] and override individual
/// fields, so a `[defaults]` entry in the config file takes effect
/// wherever the caller left the field unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsSection {
    pub clip_interval_seconds: f64,
    pub montage_length_seconds: f64,
    pub start_cut_seconds: f64,
    pub end_cut_seconds: f64,
    pub resolution: Resolution,
    pub linear_mode: bool,
    pub variation_count: usize,
    pub keep_audio: bool,
    pub custom_filename: String,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            clip_interval_seconds: 1.0,
            montage_length_seconds: 30.0,
            start_cut_seconds: 0.0,
            end_cut_seconds: 60.0,
            resolution: Resolution::P720,
            linear_mode: true,
            variation_count: 1,
            keep_audio: true,
            custom_filename: "montage".into(),
        }
    }
}

impl DefaultsSection {
    /// Request carrying the configured defaults for the given sources.
    pub fn base_request(&self, sources: Vec<String>) -> MontageRequest {
        MontageRequest {
            sources,
            clip_interval_seconds: self.clip_interval_seconds,
            montage_length_seconds: self.montage_length_seconds,
            start_cut_seconds: self.start_cut_seconds,
            end_cut_seconds: self.end_cut_seconds,
            linear_mode: self.linear_mode,
            variation_count: self.variation_count,
            keep_audio: self.keep_audio,
            output_resolution: self.resolution,
            layout: Layout::Cut,
            text_overlay: None,
            custom_filename: self.custom_filename.clone(),
        }
    }
}

pub fn load_montage_config<P: AsRef<Path>>(path: P) -> ConfigResult<MontageConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/montage.toml");
        let config = load_montage_config(path).expect("config should parse");
        assert_eq!(config.media.min_clip_bytes, 500);
        assert_eq!(config.limits.job_retention_minutes, 60);
        assert_eq!(config.defaults.end_cut_seconds, 60.0);
        assert_eq!(config.defaults.resolution, Resolution::P720);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_montage_config("/nonexistent/montage.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("montage.toml");
        std::fs::write(&path, "[limits]\ncommand_timeout_seconds = \"soon\"\n").unwrap();
        let err = load_montage_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn partial_sections_fall_back_per_field() {
        let config: MontageConfig =
            toml::from_str("[defaults]\nmontage_length_seconds = 12.0\n").unwrap();
        assert_eq!(config.defaults.montage_length_seconds, 12.0);
        assert_eq!(config.defaults.clip_interval_seconds, 1.0);
        assert_eq!(config.media.min_clip_bytes, 500);
    }

    #[test]
    fn defaults_match_observed_submission_defaults() {
        let defaults = DefaultsSection::default();
        assert_eq!(defaults.clip_interval_seconds, 1.0);
        assert_eq!(defaults.montage_length_seconds, 30.0);
        assert!(defaults.linear_mode);
        assert!(defaults.keep_audio);
        assert_eq!(defaults.variation_count, 1);
    }

    #[test]
    fn base_request_carries_configured_defaults() {
        let defaults = DefaultsSection {
            montage_length_seconds: 12.0,
            keep_audio: false,
            ..DefaultsSection::default()
        };
        let request = defaults.base_request(vec!["file:///a.mp4".into()]);
        assert_eq!(request.montage_length_seconds, 12.0);
        assert!(!request.keep_audio);
        assert_eq!(request.clip_interval_seconds, 1.0);
        assert_eq!(request.sources.len(), 1);
    }

    #[test]
    fn resolve_path_honours_base_dir() {
        let mut config = MontageConfig::default();
        config.paths.base_dir = "/var/lib/montage".into();
        assert_eq!(
            config.resolve_path("scratch"),
            PathBuf::from("/var/lib/montage/scratch")
        );
        assert_eq!(config.resolve_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
