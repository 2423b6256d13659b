use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::media::{MediaError, MediaResult};

/// Persists a finished montage and returns a URL the client can fetch
/// it from. The pipeline treats persistence failures as job-fatal.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist(&self, path: &Path, suggested_name: &str) -> MediaResult<String>;
}

/// Copies artifacts into a local output directory and hands back
/// `file://` URLs. Stands in for a remote blob store.
pub struct LocalArtifactStore {
    output_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(&self, path: &Path, suggested_name: &str) -> MediaResult<String> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|err| MediaError::Upload(err.to_string()))?;
        let dest = self.output_dir.join(suggested_name);
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|err| MediaError::Upload(format!("{}: {err}", path.display())))?;
        let absolute = tokio::fs::canonicalize(&dest)
            .await
            .map_err(|err| MediaError::Upload(err.to_string()))?;
        info!(target: "artifacts", dest = %absolute.display(), "artifact persisted");
        Ok(format!("file://{}", absolute.display()))
    }
}
