mod download;
mod error;
mod ffmpeg;
mod probe;
mod tool;

pub use download::{
    default_strategies, normalize_source_url, DownloadStrategy, Downloader, SourceFetcher,
};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::{ClipCutter, FfmpegEdit};
pub use probe::{parse_clock_duration, DurationProber, SourceKind};
pub use tool::{run_tool, status_error};
