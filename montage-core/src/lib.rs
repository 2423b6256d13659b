pub mod artifact;
pub mod assembler;
pub mod cancel;
pub mod config;
pub mod job;
pub mod materializer;
pub mod media;
pub mod pipeline;
pub mod plan;
pub mod script;

pub use artifact::{ArtifactStore, LocalArtifactStore};
pub use assembler::{Assembler, AssemblyOptions, ClipAssembler};
pub use cancel::CancelToken;
pub use config::{
    load_montage_config, ConfigError, ConfigResult, DefaultsSection, LimitsSection, MediaSection,
    MontageConfig, PathsSection,
};
pub use job::{
    Job, JobError, JobResult, JobStatus, JobStore, JobTracker, MemoryJobStore,
};
pub use materializer::{
    ClipMaterializer, MaterializeError, MaterializeOutcome, MaterializeResult, MaterializedClip,
    MaterializerConfig,
};
pub use media::{
    normalize_source_url, ClipCutter, DownloadStrategy, Downloader, DurationProber, FfmpegEdit,
    MediaError, MediaResult, SourceFetcher, SourceKind,
};
pub use pipeline::{JobHandle, MontagePipeline, PipelineError, PipelineResult, ScratchDir};
pub use plan::{
    ClipPlan, Layout, MontageRequest, PlanError, PlanResult, PlanWindow, PlannerConfig,
    Resolution, TextOverlay, TimelinePlanner, VariationPlan,
};
pub use script::ScriptRenderer;
