use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactStore, LocalArtifactStore};
use crate::assembler::{Assembler, AssemblyOptions, ClipAssembler};
use crate::cancel::CancelToken;
use crate::config::MontageConfig;
use crate::job::{JobError, JobTracker, MemoryJobStore};
use crate::materializer::{ClipMaterializer, MaterializeError, MaterializerConfig};
use crate::media::{
    ClipCutter, Downloader, DurationProber, FfmpegEdit, MediaError, SourceFetcher,
};
use crate::plan::{
    MontageRequest, PlanError, PlanWindow, PlannerConfig, TimelinePlanner, VariationPlan,
};

const PROGRESS_STARTED: u8 = 5;
const PROGRESS_SOURCES_READY: u8 = 40;
const PROGRESS_ASSEMBLED: u8 = 80;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("job cancelled")]
    Cancelled,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Per-job working directory, removed when the job's last reference to
/// it is dropped, on success and failure alike.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub async fn create(root: &Path, job_id: Uuid) -> PipelineResult<Self> {
        let path = root.join(format!("job-{job_id}"));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| MediaError::io(&path, source))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            warn!(
                target: "pipeline",
                path = %self.path.display(),
                "scratch cleanup failed: {err}"
            );
        }
    }
}

/// Handle returned on submission. The job id is what clients poll with;
/// the token cancels the background work cooperatively.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl JobHandle {
    /// Blocks until the background task has recorded a terminal status.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }
}

/// End-to-end montage orchestration: download sources, plan candidate
/// pools, materialize clips, assemble each variation and persist the
/// results, reporting progress through the job tracker throughout.
///
/// Cloning is cheap; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct MontagePipeline {
    config: Arc<MontageConfig>,
    tracker: JobTracker,
    prober: Arc<DurationProber>,
    fetcher: Arc<dyn SourceFetcher>,
    materializer: Arc<ClipMaterializer>,
    assembler: Arc<dyn ClipAssembler>,
    artifacts: Arc<dyn ArtifactStore>,
    planner: Arc<TimelinePlanner>,
}

impl MontagePipeline {
    pub fn new(config: MontageConfig, tracker: JobTracker) -> PipelineResult<Self> {
        let config = Arc::new(config);
        let ffmpeg = FfmpegEdit::new(&config.media, &config.limits);
        let cutter: Arc<dyn ClipCutter> = Arc::new(ffmpeg.clone());
        let materializer = ClipMaterializer::new(
            cutter,
            MaterializerConfig {
                min_clip_bytes: config.media.min_clip_bytes,
                ..MaterializerConfig::default()
            },
        );
        let output_dir = config.resolve_path(&config.paths.output_dir);
        Ok(Self {
            prober: Arc::new(DurationProber::new(&config.media, &config.limits)),
            fetcher: Arc::new(Downloader::new(&config.media, &config.limits)?),
            materializer: Arc::new(materializer),
            assembler: Arc::new(Assembler::new(ffmpeg)),
            artifacts: Arc::new(LocalArtifactStore::new(output_dir)),
            planner: Arc::new(TimelinePlanner::new(PlannerConfig::default())),
            tracker,
            config,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_cutter(mut self, cutter: Arc<dyn ClipCutter>) -> Self {
        self.materializer = Arc::new(ClipMaterializer::new(
            cutter,
            MaterializerConfig {
                min_clip_bytes: self.config.media.min_clip_bytes,
                ..MaterializerConfig::default()
            },
        ));
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn ClipAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Validates the request shell, creates the job and spawns the work
    /// as an independent task. Returns immediately; clients poll the
    /// tracker with the job id.
    pub async fn submit(&self, request: MontageRequest, seed: u64) -> PipelineResult<JobHandle> {
        if request.sources.is_empty() {
            return Err(PlanError::InvalidConfig("at least one source URL is required".into()).into());
        }
        let job = self.tracker.create().await;
        let job_id = job.id;
        let cancel = CancelToken::new();
        let pipeline = self.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            pipeline.run_job(job_id, request, seed, task_cancel).await;
        });
        info!(target: "pipeline", %job_id, seed, "montage job submitted");
        Ok(JobHandle {
            job_id,
            cancel,
            handle,
        })
    }

    /// Periodically evicts terminal jobs older than the retention
    /// window.
    pub fn spawn_purge_loop(&self, store: Arc<MemoryJobStore>) -> JoinHandle<()> {
        let retention = chrono::Duration::minutes(self.config.limits.job_retention_minutes);
        let every =
            std::time::Duration::from_secs(self.config.limits.purge_interval_minutes as u64 * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                store.purge_expired(Utc::now(), retention).await;
            }
        })
    }

    async fn run_job(self, job_id: Uuid, request: MontageRequest, seed: u64, cancel: CancelToken) {
        match self.execute(job_id, &request, seed, &cancel).await {
            Ok(urls) => {
                if let Err(err) = self.tracker.complete(job_id, urls).await {
                    warn!(target: "pipeline", %job_id, "could not record completion: {err}");
                }
            }
            Err(err) => {
                warn!(target: "pipeline", %job_id, "job failed: {err}");
                if let Err(record_err) = self.tracker.fail(job_id, err.to_string()).await {
                    warn!(target: "pipeline", %job_id, "could not record failure: {record_err}");
                }
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        request: &MontageRequest,
        seed: u64,
        cancel: &CancelToken,
    ) -> PipelineResult<Vec<String>> {
        self.tracker.mark_processing(job_id, PROGRESS_STARTED).await?;
        let scratch_root = self.config.resolve_path(&self.config.paths.scratch_dir);
        let scratch = ScratchDir::create(&scratch_root, job_id).await?;

        let sources = self
            .download_sources(job_id, request, scratch.path(), cancel)
            .await?;
        // Planning targets the first source that actually downloaded.
        let (primary_index, primary_path, primary_url) = &sources[0];
        self.tracker
            .set_progress(job_id, PROGRESS_SOURCES_READY)
            .await?;

        let duration = self
            .prober
            .probe_local_or_default(primary_path, primary_url)
            .await;
        let target = request.target_clip_count()?;
        let window = PlanWindow::for_request(duration, request)?;
        let plans = self
            .planner
            .plan(*primary_index, duration, request, seed)?;

        let variation_total = plans.len();
        let outputs = try_join_all(plans.iter().map(|plan| {
            self.run_variation(
                job_id,
                primary_path,
                &window,
                plan,
                target,
                request,
                seed,
                scratch.path(),
                variation_total,
                cancel,
            )
        }))
        .await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.tracker.set_progress(job_id, PROGRESS_ASSEMBLED).await?;
        self.persist_outputs(job_id, &outputs, &request.custom_filename)
            .await
    }

    /// Downloads each source into the scratch directory; a single
    /// failure skips that source, and only losing all of them is fatal.
    async fn download_sources(
        &self,
        job_id: Uuid,
        request: &MontageRequest,
        scratch: &Path,
        cancel: &CancelToken,
    ) -> PipelineResult<Vec<(usize, PathBuf, String)>> {
        let mut downloaded = Vec::new();
        for (index, url) in request.sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let dest = scratch.join(format!("source_{index}.mp4"));
            match self.fetcher.fetch(url, &dest).await {
                Ok(()) => downloaded.push((index, dest, url.clone())),
                Err(err) => {
                    warn!(target: "pipeline", %job_id, url = %url, "source skipped: {err}");
                }
            }
            let progress = (10 + index * 10).min(35) as u8;
            self.tracker.set_progress(job_id, progress).await?;
        }
        if downloaded.is_empty() {
            return Err(MediaError::Download {
                url: request.sources.join(", "),
                reason: "every source download failed".into(),
            }
            .into());
        }
        Ok(downloaded)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_variation(
        &self,
        job_id: Uuid,
        source: &Path,
        window: &PlanWindow,
        plan: &VariationPlan,
        target: usize,
        request: &MontageRequest,
        seed: u64,
        scratch: &Path,
        variation_total: usize,
        cancel: &CancelToken,
    ) -> PipelineResult<PathBuf> {
        let mut rng =
            ChaCha20Rng::seed_from_u64(derive_task_seed(seed, plan.variation_index));
        let outcome = self
            .materializer
            .materialize(
                source,
                window,
                &plan.clips,
                target,
                scratch,
                plan.variation_index,
                request.keep_audio,
                &mut rng,
                cancel,
            )
            .await?;
        if outcome.cancelled {
            return Err(PipelineError::Cancelled);
        }
        let dest = scratch.join(format!(
            "{}_v{:02}.mp4",
            request.custom_filename,
            plan.variation_index + 1
        ));
        let options = AssemblyOptions {
            layout: request.layout,
            resolution: request.output_resolution,
            overlay: request.text_overlay.clone(),
            keep_audio: request.keep_audio,
            montage_length_seconds: request.montage_length_seconds,
        };
        self.assembler
            .assemble(&outcome.clips, &dest, &options, &mut rng)
            .await?;
        let done = plan.variation_index + 1;
        let progress = PROGRESS_SOURCES_READY + (40 * done / variation_total) as u8;
        self.tracker.set_progress(job_id, progress).await?;
        Ok(dest)
    }

    async fn persist_outputs(
        &self,
        job_id: Uuid,
        outputs: &[PathBuf],
        filename: &str,
    ) -> PipelineResult<Vec<String>> {
        let stamp = Utc::now().timestamp_millis();
        let mut urls = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.iter().enumerate() {
            let name = format!("{filename}_v{:02}_{stamp}.mp4", index + 1);
            let url = self.artifacts.persist(output, &name).await?;
            urls.push(url);
            let progress = PROGRESS_ASSEMBLED + (20 * (index + 1) / outputs.len()) as u8;
            self.tracker.set_progress(job_id, progress).await?;
        }
        Ok(urls)
    }
}

/// Materializer and assembler randomness is derived from the job seed
/// and variation index, separately from the planner's stream.
fn derive_task_seed(seed: u64, variation_index: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    variation_index.hash(&mut hasher);
    "materialize".hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::materializer::MaterializedClip;
    use crate::media::MediaResult;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FakeFetcher {
        fail: bool,
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> MediaResult<()> {
            if self.fail {
                return Err(MediaError::Download {
                    url: url.to_string(),
                    reason: "host unreachable".into(),
                });
            }
            tokio::fs::write(dest, vec![0u8; 4096])
                .await
                .map_err(|source| MediaError::io(dest, source))
        }
    }

    struct FakeCutter {
        fail: bool,
    }

    #[async_trait]
    impl ClipCutter for FakeCutter {
        async fn cut(
            &self,
            _source: &Path,
            start_seconds: f64,
            _duration_seconds: f64,
            dest: &Path,
            _keep_audio: bool,
        ) -> MediaResult<()> {
            if self.fail {
                return Err(MediaError::Extraction(format!(
                    "cannot cut at {start_seconds}s"
                )));
            }
            tokio::fs::write(dest, vec![1u8; 2048])
                .await
                .map_err(|source| MediaError::io(dest, source))
        }
    }

    struct FakeAssembler;

    #[async_trait]
    impl ClipAssembler for FakeAssembler {
        async fn assemble(
            &self,
            clips: &[MaterializedClip],
            dest: &Path,
            _options: &AssemblyOptions,
            _rng: &mut ChaCha20Rng,
        ) -> MediaResult<PathBuf> {
            tokio::fs::write(dest, format!("montage of {} clips", clips.len()))
                .await
                .map_err(|source| MediaError::io(dest, source))?;
            Ok(dest.to_path_buf())
        }
    }

    fn harness(base_dir: &Path) -> (MontagePipeline, JobTracker) {
        let mut config = MontageConfig::default();
        config.paths.base_dir = base_dir.display().to_string();
        let store = Arc::new(MemoryJobStore::new());
        let tracker = JobTracker::new(store);
        let pipeline = MontagePipeline::new(config, tracker.clone())
            .unwrap()
            .with_fetcher(Arc::new(FakeFetcher { fail: false }))
            .with_cutter(Arc::new(FakeCutter { fail: false }))
            .with_assembler(Arc::new(FakeAssembler));
        (pipeline, tracker)
    }

    fn request() -> MontageRequest {
        MontageRequest {
            sources: vec!["https://cdn.example.com/source.mp4".into()],
            clip_interval_seconds: 2.0,
            montage_length_seconds: 10.0,
            end_cut_seconds: 0.0,
            ..MontageRequest::default()
        }
    }

    #[tokio::test]
    async fn completed_job_reports_download_urls() {
        let dir = tempdir().unwrap();
        let (pipeline, tracker) = harness(dir.path());
        let handle = pipeline.submit(request(), 11).await.unwrap();
        let job_id = handle.job_id;
        handle.wait().await;

        let job = tracker.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.download_urls.len(), 1);
        assert!(job.download_urls[0].starts_with("file://"));
        assert!(job.download_urls[0].contains("montage_v01_"));
    }

    #[tokio::test]
    async fn each_variation_yields_its_own_artifact() {
        let dir = tempdir().unwrap();
        let (pipeline, tracker) = harness(dir.path());
        let handle = pipeline
            .submit(
                MontageRequest {
                    variation_count: 3,
                    ..request()
                },
                11,
            )
            .await
            .unwrap();
        let job_id = handle.job_id;
        handle.wait().await;

        let job = tracker.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.download_urls.len(), 3);
        assert!(job.download_urls[0].contains("_v01_"));
        assert!(job.download_urls[2].contains("_v03_"));
    }

    #[tokio::test]
    async fn scratch_is_cleaned_up_after_completion() {
        let dir = tempdir().unwrap();
        let (pipeline, _tracker) = harness(dir.path());
        let handle = pipeline.submit(request(), 3).await.unwrap();
        handle.wait().await;

        let mut entries = tokio::fs::read_dir(dir.path().join("scratch")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn losing_every_source_fails_the_job() {
        let dir = tempdir().unwrap();
        let (pipeline, tracker) = harness(dir.path());
        let pipeline = pipeline.with_fetcher(Arc::new(FakeFetcher { fail: true }));
        let handle = pipeline.submit(request(), 3).await.unwrap();
        let job_id = handle.job_id;
        handle.wait().await;

        let job = tracker.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .contains("every source download failed"));
    }

    #[tokio::test]
    async fn zero_extracted_clips_fails_instead_of_hanging() {
        let dir = tempdir().unwrap();
        let (pipeline, tracker) = harness(dir.path());
        let pipeline = pipeline.with_cutter(Arc::new(FakeCutter { fail: true }));
        let handle = pipeline.submit(request(), 3).await.unwrap();
        let job_id = handle.job_id;
        handle.wait().await;

        let job = tracker.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .contains("no usable clips extracted"));
    }

    #[tokio::test]
    async fn empty_source_list_is_rejected_before_job_creation() {
        let dir = tempdir().unwrap();
        let (pipeline, _tracker) = harness(dir.path());
        let err = pipeline
            .submit(
                MontageRequest {
                    sources: Vec::new(),
                    ..request()
                },
                3,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Plan(PlanError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn cancellation_fails_the_job_cooperatively() {
        let dir = tempdir().unwrap();
        let (pipeline, tracker) = harness(dir.path());
        let handle = pipeline.submit(request(), 3).await.unwrap();
        let job_id = handle.job_id;
        // Current-thread runtime: the spawned task has not run yet, so
        // the flag is observed at its first checkpoint.
        handle.cancel.cancel();
        handle.wait().await;

        let job = tracker.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("job cancelled"));
    }
}
