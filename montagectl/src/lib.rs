use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;

use montage_core::{
    load_montage_config, DefaultsSection, DurationProber, JobStatus, JobTracker, Layout,
    MemoryJobStore, MontageConfig, MontagePipeline, MontageRequest, PlannerConfig, Resolution,
    ScriptRenderer, TextOverlay, TimelinePlanner, VariationPlan,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] montage_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] montage_core::PipelineError),
    #[error("planning error: {0}")]
    Plan(#[from] montage_core::PlanError),
    #[error("media error: {0}")]
    Media(#[from] montage_core::MediaError),
    #[error("job error: {0}")]
    Job(#[from] montage_core::JobError),
    #[error("montage job failed: {0}")]
    JobFailed(String),
    #[error("at least one source URL is required")]
    NoSources,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Montage generation command-line interface", long_about = None)]
pub struct Cli {
    /// Path to montage.toml; built-in defaults apply when the file is absent
    #[arg(long, default_value = "configs/montage.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline and wait for the montage URLs
    Generate(GenerateArgs),
    /// Print the planned clip variations without touching any media
    Plan(PlanArgs),
    /// Render the request as a standalone bash script
    Script(ScriptArgs),
    /// Print a source's duration in seconds
    Probe(ProbeArgs),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Submission surface shared by the generating subcommands. Flags left
/// unset fall back to the config's `[defaults]` section.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Source video URL, repeatable; bare platform video ids are expanded
    #[arg(long = "source")]
    pub sources: Vec<String>,
    /// Seconds of source per clip
    #[arg(long)]
    pub interval: Option<f64>,
    /// Montage length in seconds
    #[arg(long)]
    pub length: Option<f64>,
    /// Seconds trimmed from the start of the source
    #[arg(long)]
    pub start_cut: Option<f64>,
    /// Seconds trimmed from the end of the source
    #[arg(long)]
    pub end_cut: Option<f64>,
    /// Output resolution: 480p, 720p, 1080p or original
    #[arg(long)]
    pub resolution: Option<Resolution>,
    /// Clip arrangement: cut or stacked
    #[arg(long, default_value = "cut")]
    pub layout: Layout,
    /// Shuffle clips instead of keeping chronological order
    #[arg(long)]
    pub random: bool,
    /// Number of montage variations
    #[arg(long)]
    pub variations: Option<usize>,
    /// Strip the audio track
    #[arg(long)]
    pub no_audio: bool,
    /// Text drawn centered over the montage
    #[arg(long)]
    pub overlay_text: Option<String>,
    /// Base name for output files
    #[arg(long)]
    pub filename: Option<String>,
    /// Seed for reproducible plans
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl RequestArgs {
    fn to_request(&self, defaults: &DefaultsSection) -> Result<MontageRequest> {
        if self.sources.is_empty() {
            return Err(AppError::NoSources);
        }
        let mut request = defaults.base_request(self.sources.clone());
        if let Some(interval) = self.interval {
            request.clip_interval_seconds = interval;
        }
        if let Some(length) = self.length {
            request.montage_length_seconds = length;
        }
        if let Some(start_cut) = self.start_cut {
            request.start_cut_seconds = start_cut;
        }
        if let Some(end_cut) = self.end_cut {
            request.end_cut_seconds = end_cut;
        }
        if let Some(resolution) = self.resolution {
            request.output_resolution = resolution;
        }
        if let Some(variations) = self.variations {
            request.variation_count = variations;
        }
        if let Some(filename) = &self.filename {
            request.custom_filename = filename.clone();
        }
        if self.random {
            request.linear_mode = false;
        }
        if self.no_audio {
            request.keep_audio = false;
        }
        request.layout = self.layout;
        request.text_overlay = self.overlay_text.clone().map(TextOverlay::new);
        Ok(request)
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub request: RequestArgs,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub request: RequestArgs,
    /// Source duration to plan against, instead of probing
    #[arg(long)]
    pub duration: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ScriptArgs {
    #[command(flatten)]
    pub request: RequestArgs,
    /// Source duration to plan against, instead of probing
    #[arg(long)]
    pub duration: Option<f64>,
    /// Write the script here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Source URL or local path
    pub source: String,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(cli))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_async(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    match &cli.command {
        Commands::Generate(args) => generate(&config, args, cli.format).await,
        Commands::Plan(args) => plan(&config, args, cli.format).await,
        Commands::Script(args) => script(&config, args).await,
        Commands::Probe(args) => probe(&config, args, cli.format).await,
        Commands::Completions(args) => {
            completions(args);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<MontageConfig> {
    if path.exists() {
        Ok(load_montage_config(path)?)
    } else {
        Ok(MontageConfig::default())
    }
}

async fn generate(config: &MontageConfig, args: &GenerateArgs, format: OutputFormat) -> Result<()> {
    let request = args.request.to_request(&config.defaults)?;
    let store = Arc::new(MemoryJobStore::new());
    let tracker = JobTracker::new(store);
    let pipeline = MontagePipeline::new(config.clone(), tracker.clone())?;
    let handle = pipeline.submit(request, args.request.seed).await?;
    let job_id = handle.job_id;

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let mut last_progress = 0;
    loop {
        poll.tick().await;
        let job = tracker.status(job_id).await?;
        if job.progress != last_progress {
            eprintln!(
                "{} [{}] {}%",
                chrono::Local::now().format("%H:%M:%S"),
                job.status,
                job.progress
            );
            last_progress = job.progress;
        }
        if job.status.terminal() {
            return match job.status {
                JobStatus::Completed => render(
                    &GenerateReport {
                        job_id: job_id.to_string(),
                        download_urls: job.download_urls,
                    },
                    format,
                ),
                _ => Err(AppError::JobFailed(
                    job.error.unwrap_or_else(|| "unknown error".into()),
                )),
            };
        }
    }
}

async fn plan(config: &MontageConfig, args: &PlanArgs, format: OutputFormat) -> Result<()> {
    let request = args.request.to_request(&config.defaults)?;
    let duration = resolve_duration(config, args.duration, &request).await;
    let planner = TimelinePlanner::new(PlannerConfig::default());
    let variations = planner.plan(0, duration, &request, args.request.seed)?;
    render(
        &PlanReport {
            source_duration_seconds: duration,
            variations,
        },
        format,
    )
}

async fn script(config: &MontageConfig, args: &ScriptArgs) -> Result<()> {
    let request = args.request.to_request(&config.defaults)?;
    let duration = resolve_duration(config, args.duration, &request).await;
    let planner = TimelinePlanner::new(PlannerConfig::default());
    let variations = planner.plan(0, duration, &request, args.request.seed)?;
    let rendered = ScriptRenderer::new(&config.media).render(&request, &variations)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn probe(config: &MontageConfig, args: &ProbeArgs, format: OutputFormat) -> Result<()> {
    let prober = DurationProber::new(&config.media, &config.limits);
    let duration = prober.probe(&args.source).await?;
    render(
        &ProbeReport {
            source: args.source.clone(),
            duration_seconds: duration,
        },
        format,
    )
}

fn completions(args: &CompletionsArgs) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(args.shell, &mut command, name, &mut io::stdout());
}

async fn resolve_duration(
    config: &MontageConfig,
    explicit: Option<f64>,
    request: &MontageRequest,
) -> f64 {
    match explicit {
        Some(duration) => duration,
        None => {
            DurationProber::new(&config.media, &config.limits)
                .probe_or_default(&request.sources[0])
                .await
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct GenerateReport {
    pub job_id: String,
    pub download_urls: Vec<String>,
}

impl DisplayFallback for GenerateReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("job {} completed", self.job_id)];
        for url in &self.download_urls {
            lines.push(format!("  {url}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub source_duration_seconds: f64,
    pub variations: Vec<VariationPlan>,
}

impl DisplayFallback for PlanReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "source duration: {}s",
            self.source_duration_seconds
        )];
        for variation in &self.variations {
            lines.push(format!(
                "variation {} ({} candidates):",
                variation.variation_index + 1,
                variation.clips.len()
            ));
            for clip in &variation.clips {
                lines.push(format!(
                    "  {:>9.2}s .. {:>9.2}s",
                    clip.start_seconds,
                    clip.end_seconds()
                ));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub duration_seconds: f64,
}

impl DisplayFallback for ProbeReport {
    fn display(&self) -> String {
        format!("{}: {}s", self.source, self.duration_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_args_map_onto_the_core_request() {
        let cli = Cli::try_parse_from([
            "montagectl",
            "plan",
            "--source",
            "https://cdn.example.com/a.mp4",
            "--interval",
            "2",
            "--length",
            "20",
            "--random",
            "--no-audio",
            "--variations",
            "3",
            "--resolution",
            "1080p",
            "--layout",
            "stacked",
            "--overlay-text",
            "hello",
            "--duration",
            "300",
        ])
        .unwrap();
        let Commands::Plan(args) = &cli.command else {
            panic!("expected plan subcommand");
        };
        let request = args.request.to_request(&DefaultsSection::default()).unwrap();
        assert_eq!(request.clip_interval_seconds, 2.0);
        assert_eq!(request.montage_length_seconds, 20.0);
        assert!(!request.linear_mode);
        assert!(!request.keep_audio);
        assert_eq!(request.variation_count, 3);
        assert_eq!(request.output_resolution, Resolution::P1080);
        assert_eq!(request.layout, Layout::Stacked);
        assert_eq!(request.text_overlay.as_ref().unwrap().text, "hello");
        assert_eq!(args.duration, Some(300.0));
    }

    #[test]
    fn defaults_match_the_submission_surface() {
        let cli = Cli::try_parse_from([
            "montagectl",
            "generate",
            "--source",
            "https://cdn.example.com/a.mp4",
        ])
        .unwrap();
        let Commands::Generate(args) = &cli.command else {
            panic!("expected generate subcommand");
        };
        let request = args.request.to_request(&DefaultsSection::default()).unwrap();
        assert_eq!(request.clip_interval_seconds, 1.0);
        assert_eq!(request.montage_length_seconds, 30.0);
        assert_eq!(request.end_cut_seconds, 60.0);
        assert_eq!(request.output_resolution, Resolution::P720);
        assert!(request.linear_mode);
        assert!(request.keep_audio);
        assert_eq!(request.custom_filename, "montage");
    }

    #[test]
    fn missing_sources_are_rejected() {
        let cli = Cli::try_parse_from(["montagectl", "generate"]).unwrap();
        let Commands::Generate(args) = &cli.command else {
            panic!("expected generate subcommand");
        };
        assert!(matches!(
            args.request.to_request(&DefaultsSection::default()),
            Err(AppError::NoSources)
        ));
    }

    #[test]
    fn config_defaults_apply_when_flags_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("montage.toml");
        std::fs::write(
            &path,
            "[defaults]\nmontage_length_seconds = 12.0\nkeep_audio = false\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();

        let cli = Cli::try_parse_from([
            "montagectl",
            "generate",
            "--source",
            "https://cdn.example.com/a.mp4",
        ])
        .unwrap();
        let Commands::Generate(args) = &cli.command else {
            panic!("expected generate subcommand");
        };
        let request = args.request.to_request(&config.defaults).unwrap();
        assert_eq!(request.montage_length_seconds, 12.0);
        assert!(!request.keep_audio);

        // An explicit flag still wins over the file-level default.
        let cli = Cli::try_parse_from([
            "montagectl",
            "generate",
            "--source",
            "https://cdn.example.com/a.mp4",
            "--length",
            "20",
        ])
        .unwrap();
        let Commands::Generate(args) = &cli.command else {
            panic!("expected generate subcommand");
        };
        let request = args.request.to_request(&config.defaults).unwrap();
        assert_eq!(request.montage_length_seconds, 20.0);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/montage.toml")).unwrap();
        assert_eq!(config.media.min_clip_bytes, 500);
        assert_eq!(config.limits.job_retention_minutes, 60);
    }

    #[test]
    fn plan_subcommand_renders_with_an_explicit_duration() {
        let cli = Cli::try_parse_from([
            "montagectl",
            "--format",
            "json",
            "plan",
            "--source",
            "https://cdn.example.com/a.mp4",
            "--interval",
            "2",
            "--length",
            "10",
            "--end-cut",
            "0",
            "--duration",
            "120",
        ])
        .unwrap();
        run(cli).unwrap();
    }
}
