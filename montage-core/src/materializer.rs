use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::media::ClipCutter;
use crate::plan::{ClipPlan, PlanWindow};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("no usable clips extracted from {src}")]
    NoClipsExtracted { src: String },
}

pub type MaterializeResult<T> = std::result::Result<T, MaterializeError>;

#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Artifacts at or below this size are treated as empty or corrupt
    /// containers and rejected.
    pub min_clip_bytes: u64,
    /// Total extraction attempts are capped at this multiple of the
    /// target clip count.
    pub attempt_factor: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            min_clip_bytes: 500,
            attempt_factor: 3,
        }
    }
}

/// One successfully extracted clip on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedClip {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Result of draining a candidate pool. A shortfall is a warning, not a
/// failure: the montage just comes out shorter.
#[derive(Debug, Clone)]
pub struct MaterializeOutcome {
    pub clips: Vec<MaterializedClip>,
    pub attempts: usize,
    pub shortfall: usize,
    pub cancelled: bool,
}

/// Turns planned time ranges into actual clip files, tolerating
/// per-candidate failures. Consumes the over-provisioned pool in order,
/// then synthesizes spaced random candidates until the target is met or
/// the attempt budget runs out.
pub struct ClipMaterializer {
    cutter: Arc<dyn ClipCutter>,
    config: MaterializerConfig,
}

impl ClipMaterializer {
    pub fn new(cutter: Arc<dyn ClipCutter>, config: MaterializerConfig) -> Self {
        Self { cutter, config }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn materialize(
        &self,
        source: &Path,
        window: &PlanWindow,
        pool: &[ClipPlan],
        target: usize,
        scratch_dir: &Path,
        variation_index: usize,
        keep_audio: bool,
        rng: &mut ChaCha20Rng,
        cancel: &CancelToken,
    ) -> MaterializeResult<MaterializeOutcome> {
        let max_attempts = target * self.config.attempt_factor;
        let mut accepted: Vec<MaterializedClip> = Vec::with_capacity(target);
        let mut accepted_starts: Vec<f64> = Vec::with_capacity(target);
        let mut attempts = 0;
        let mut cancelled = false;

        for candidate in pool {
            if accepted.len() >= target || attempts >= max_attempts {
                break;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            attempts += 1;
            self.try_candidate(
                source,
                candidate.start_seconds,
                candidate.duration_seconds,
                scratch_dir,
                variation_index,
                accepted.len(),
                keep_audio,
                &mut accepted,
                &mut accepted_starts,
            )
            .await;
        }

        // Pool exhausted short of the target: synthesize replacements
        // under the same window constraints, keeping clip spacing.
        while !cancelled && accepted.len() < target && attempts < max_attempts {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            attempts += 1;
            let candidate =
                window.clamp_start(window.start_cut + rng.gen::<f64>() * window.spread());
            let spaced = accepted_starts
                .iter()
                .all(|existing| (existing - candidate).abs() >= window.clip_interval);
            if !spaced {
                continue;
            }
            self.try_candidate(
                source,
                candidate,
                window.clip_interval,
                scratch_dir,
                variation_index,
                accepted.len(),
                keep_audio,
                &mut accepted,
                &mut accepted_starts,
            )
            .await;
        }

        if accepted.is_empty() && !cancelled {
            return Err(MaterializeError::NoClipsExtracted {
                src: source.display().to_string(),
            });
        }

        let shortfall = target.saturating_sub(accepted.len());
        if shortfall > 0 {
            warn!(
                target: "materializer",
                variation = variation_index,
                accepted = accepted.len(),
                target,
                attempts,
                "partial result: pool and backfill fell short"
            );
        } else {
            info!(
                target: "materializer",
                variation = variation_index,
                accepted = accepted.len(),
                attempts,
                "clips materialized"
            );
        }
        Ok(MaterializeOutcome {
            clips: accepted,
            attempts,
            shortfall,
            cancelled,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_candidate(
        &self,
        source: &Path,
        start_seconds: f64,
        duration_seconds: f64,
        scratch_dir: &Path,
        variation_index: usize,
        clip_index: usize,
        keep_audio: bool,
        accepted: &mut Vec<MaterializedClip>,
        accepted_starts: &mut Vec<f64>,
    ) {
        let dest = scratch_dir.join(format!(
            "clip_v{}_{:02}.mp4",
            variation_index + 1,
            clip_index + 1
        ));
        if let Err(err) = self
            .cutter
            .cut(source, start_seconds, duration_seconds, &dest, keep_audio)
            .await
        {
            warn!(
                target: "materializer",
                variation = variation_index,
                start = start_seconds,
                "clip extraction failed, skipping candidate: {err}"
            );
            return;
        }
        match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.len() > self.config.min_clip_bytes => {
                accepted_starts.push(start_seconds);
                accepted.push(MaterializedClip {
                    path: dest,
                    size_bytes: meta.len(),
                });
            }
            Ok(meta) => {
                warn!(
                    target: "materializer",
                    variation = variation_index,
                    bytes = meta.len(),
                    "clip too small, rejecting as corrupt"
                );
            }
            Err(_) => {
                warn!(
                    target: "materializer",
                    variation = variation_index,
                    start = start_seconds,
                    "clip artifact missing after extraction"
                );
            }
        }
    }
}
