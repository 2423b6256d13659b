use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("duration unavailable for {src}: {reason}")]
    DurationUnavailable { src: String, reason: String },
    #[error("clip extraction failed: {0}")]
    Extraction(String),
    #[error("assembly failed: {0}")]
    Assembly(String),
    #[error("artifact upload failed: {0}")]
    Upload(String),
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl MediaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MediaError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;
